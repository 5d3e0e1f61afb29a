use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
#[cfg(feature = "rocm")]
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rocml::backend::{RuntimeHandle, VirtualDevice, VirtualDeviceConfig};
use rocml::cluster::{
    AlgoSelection, BatchPlan, BatchPlanner, DataType, DatasetView, Dbscan, DbscanLayout,
    PlannerConfig,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "rocml-dbscan", version)]
#[command(about = "Density-based clustering of CSV points under a device memory budget", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cluster the points and print one label per row
    Fit {
        #[command(flatten)]
        run: RunArgs,
        /// Print a JSON summary instead of labels
        #[arg(long)]
        json: bool,
    },
    /// Report the batch plan without clustering
    Plan {
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// CSV file with one point per line ("-" reads stdin)
    #[arg(short, long, default_value = "-")]
    input: PathBuf,
    /// Skip the first line of the input
    #[arg(long)]
    header: bool,
    /// Neighbourhood radius
    #[arg(long)]
    eps: f64,
    /// Minimum neighbourhood size of a core point, the point included
    #[arg(long, default_value_t = 5)]
    min_pts: usize,
    /// Element precision used for distances
    #[arg(long, value_enum, default_value_t = Precision::F32)]
    precision: Precision,
    /// Virtual device memory in MiB
    #[arg(long, default_value_t = 1024)]
    device_memory_mb: usize,
    /// HIP device to run on instead of the virtual device
    ///
    /// `plan` works on any device; `fit` needs host-accessible device memory
    /// and is rejected during planning on HIP.
    #[cfg(feature = "rocm")]
    #[arg(long)]
    hip_device: Option<i32>,
    /// Ceiling on batch_size * n_rows (defaults to ROCML_MAX_BATCH_ELEMENTS or 2e9)
    #[arg(long)]
    max_batch_elements: Option<usize>,
    /// Fail after this many batch-count escalations
    #[arg(long)]
    max_escalations: Option<usize>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Precision {
    F32,
    F64,
}

struct Points {
    values: Vec<f64>,
    n_rows: usize,
    n_cols: usize,
}

#[derive(Debug, Serialize)]
struct PlanSummary {
    n_rows: usize,
    n_cols: usize,
    device: String,
    plan: BatchPlan,
    algos: AlgoSelection,
}

fn main() -> anyhow::Result<()> {
    rocml::init_logging_default();
    let cli = Cli::parse();
    match cli.command {
        Commands::Fit { run, json } => {
            let points = read_points(&run)?;
            let dbscan =
                Dbscan::new(build_handle(&run)?).with_planner_config(planner_config(&run)?);
            let (labels, report) = match run.precision {
                Precision::F32 => fit_as::<f32>(&dbscan, &points, run.eps, run.min_pts)?,
                Precision::F64 => fit_as::<f64>(&dbscan, &points, run.eps, run.min_pts)?,
            };

            let stdout = io::stdout();
            let mut out = stdout.lock();
            if json {
                serde_json::to_writer_pretty(&mut out, &report)?;
                writeln!(out)?;
            } else {
                for label in labels {
                    writeln!(out, "{}", label)?;
                }
            }
        }
        Commands::Plan { run } => {
            let points = read_points(&run)?;
            let handle = build_handle(&run)?;
            let summary = match run.precision {
                Precision::F32 => plan_as::<f32>(&handle, &points, &run)?,
                Precision::F64 => plan_as::<f64>(&handle, &points, &run)?,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

fn build_handle(run: &RunArgs) -> anyhow::Result<RuntimeHandle> {
    #[cfg(feature = "rocm")]
    if let Some(device_id) = run.hip_device {
        let runtime = rocml::backend::HipRuntime::new(device_id)?;
        return Ok(RuntimeHandle::new(Arc::new(runtime)));
    }

    let capacity = run
        .device_memory_mb
        .checked_mul(1024 * 1024)
        .context("device memory size overflows")?;
    let device = VirtualDevice::new(VirtualDeviceConfig::new().with_capacity_bytes(capacity))?;
    Ok(RuntimeHandle::new(device.runtime()))
}

fn planner_config(run: &RunArgs) -> anyhow::Result<PlannerConfig> {
    let mut config = PlannerConfig::from_env()?;
    if let Some(max) = run.max_batch_elements {
        config = config.with_max_elements_per_batch(max);
    }
    if let Some(max) = run.max_escalations {
        config = config.with_max_escalations(max);
    }
    config.validate()?;
    Ok(config)
}

fn convert<T: DataType>(points: &Points) -> Vec<T> {
    points.values.iter().map(|&v| T::from_f64(v)).collect()
}

fn fit_as<T: DataType>(
    dbscan: &Dbscan,
    points: &Points,
    eps: f64,
    min_pts: usize,
) -> anyhow::Result<(Vec<i32>, rocml::FitReport)> {
    let data = convert::<T>(points);
    let mut labels = vec![rocml::NOISE; points.n_rows];
    let report = dbscan
        .fit(
            &data,
            points.n_rows,
            points.n_cols,
            T::from_f64(eps),
            min_pts,
            &mut labels,
        )
        .context("clustering failed")?;
    Ok((labels, report))
}

fn plan_as<T: DataType>(
    handle: &RuntimeHandle,
    points: &Points,
    run: &RunArgs,
) -> anyhow::Result<PlanSummary> {
    let data = convert::<T>(points);
    DatasetView::new(&data, points.n_rows, points.n_cols)?;
    let planner = BatchPlanner::new(planner_config(run)?);
    let algos = AlgoSelection::default();

    // Sized from the layout alone so planning also works on devices the
    // reference executor cannot run on
    let plan = planner.plan(points.n_rows, handle, |batch_count| {
        Ok(DbscanLayout::new::<T>(points.n_rows, batch_count, algos)?.total_bytes())
    })?;

    Ok(PlanSummary {
        n_rows: points.n_rows,
        n_cols: points.n_cols,
        device: handle.runtime().name().to_string(),
        plan,
        algos,
    })
}

fn read_points(run: &RunArgs) -> anyhow::Result<Points> {
    let reader: Box<dyn Read> = if run.input.as_os_str() == "-" {
        Box::new(io::stdin())
    } else {
        Box::new(
            std::fs::File::open(&run.input)
                .with_context(|| format!("cannot open {}", run.input.display()))?,
        )
    };
    parse_csv(BufReader::new(reader), run.header)
}

fn parse_csv(reader: impl BufRead, header: bool) -> anyhow::Result<Points> {
    let mut values = Vec::new();
    let mut n_cols = None;
    let mut n_rows = 0;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if (header && line_no == 0) || line.is_empty() || line.starts_with('#') {
            continue;
        }
        let before = values.len();
        for field in line.split(',') {
            let value: f64 = field
                .trim()
                .parse()
                .with_context(|| format!("line {}: bad number {:?}", line_no + 1, field))?;
            values.push(value);
        }
        let cols = values.len() - before;
        match n_cols {
            None => n_cols = Some(cols),
            Some(expected) if expected != cols => bail!(
                "line {}: expected {} columns, found {}",
                line_no + 1,
                expected,
                cols
            ),
            Some(_) => {}
        }
        n_rows += 1;
    }

    Ok(Points {
        values,
        n_rows,
        n_cols: n_cols.unwrap_or(0),
    })
}
