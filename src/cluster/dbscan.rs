//! DBSCAN entry point
//!
//! A fit selects sub-algorithms, plans a batch count against free device
//! memory, allocates exactly the planned workspace, runs the executor and
//! hands the workspace back. Nothing is retried: an allocation failure after
//! planning (another consumer took the memory) aborts the fit.

use std::sync::Arc;

use serde::Serialize;

use super::algo::{AlgoSelection, AlgoSelector, FixedAlgoSelector};
use super::dataset::{DataType, DatasetView, DensityParams};
use super::executor::{ClusteringExecutor, ReferenceDbscan, NOISE};
use super::planner::{BatchPlan, BatchPlanner, PlannerConfig};
use crate::backend::RuntimeHandle;
use crate::error::{MlError, MlResult};
use crate::memory::DeviceBuffer;

/// What a successful fit did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FitReport {
    pub plan: BatchPlan,
    pub algos: AlgoSelection,
    /// Workspace bytes the executor reported consuming
    pub workspace_consumed: usize,
    /// Distinct non-noise labels
    pub clusters: usize,
    /// Rows labelled noise
    pub noise: usize,
}

/// Density-based clustering bound to a runtime handle
pub struct Dbscan {
    handle: RuntimeHandle,
    planner: BatchPlanner,
    selector: Arc<dyn AlgoSelector>,
}

impl Dbscan {
    /// Default planner and the fixed sub-algorithm selection
    pub fn new(handle: RuntimeHandle) -> Self {
        Self {
            handle,
            planner: BatchPlanner::default(),
            selector: Arc::new(FixedAlgoSelector::default()),
        }
    }

    pub fn with_planner_config(mut self, config: PlannerConfig) -> Self {
        self.planner = BatchPlanner::new(config);
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn AlgoSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn handle(&self) -> &RuntimeHandle {
        &self.handle
    }

    pub fn planner(&self) -> &BatchPlanner {
        &self.planner
    }

    /// Cluster `n_rows` row-major points into `labels`
    ///
    /// `labels[i]` receives the cluster of row `i` (numbered from 0) or
    /// [`NOISE`]. Labels are only meaningful if the call succeeds.
    #[allow(clippy::too_many_arguments)]
    pub fn fit<T: DataType>(
        &self,
        input: &[T],
        n_rows: usize,
        n_cols: usize,
        eps: T,
        min_pts: usize,
        labels: &mut [i32],
    ) -> MlResult<FitReport> {
        let executor = ReferenceDbscan::new(self.handle.get_device_allocator());
        self.fit_with_executor(&executor, input, n_rows, n_cols, eps, min_pts, labels)
    }

    /// [`Dbscan::fit`] with a caller-supplied executor
    #[allow(clippy::too_many_arguments)]
    pub fn fit_with_executor<T, E>(
        &self,
        executor: &E,
        input: &[T],
        n_rows: usize,
        n_cols: usize,
        eps: T,
        min_pts: usize,
        labels: &mut [i32],
    ) -> MlResult<FitReport>
    where
        T: DataType,
        E: ClusteringExecutor<T> + ?Sized,
    {
        let view = DatasetView::new(input, n_rows, n_cols)?;
        if labels.len() < n_rows {
            return Err(MlError::InvalidInput(format!(
                "label buffer holds {} entries, need {}",
                labels.len(),
                n_rows
            )));
        }
        let params = DensityParams::new(eps, min_pts);
        let stream = self.handle.stream();
        let algos = self.selector.select(&view.shape());

        let plan = self.planner.plan(n_rows, &self.handle, |batch_count| {
            executor.run(&view, &params, labels, algos, None, batch_count, stream)
        })?;

        let mut workspace = DeviceBuffer::<u8>::new(self.handle.get_device_allocator());
        workspace.resize(plan.workspace_bytes, stream)?;
        let consumed = executor.run(
            &view,
            &params,
            labels,
            algos,
            Some(&mut workspace),
            plan.batch_count,
            stream,
        );
        workspace.release(stream);
        let workspace_consumed = consumed?;
        self.handle.synchronize()?;

        let labels = &labels[..n_rows];
        let clusters = labels.iter().copied().max().map_or(0, |m| (m + 1).max(0) as usize);
        let noise = labels.iter().filter(|&&l| l == NOISE).count();

        tracing::info!(
            "Dbscan::fit: {} rows ({}) -> {} clusters, {} noise; {} batches, {} workspace bytes",
            n_rows,
            T::NAME,
            clusters,
            noise,
            plan.batch_count,
            plan.workspace_bytes
        );

        Ok(FitReport {
            plan,
            algos,
            workspace_consumed,
            clusters,
            noise,
        })
    }
}

impl std::fmt::Debug for Dbscan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dbscan")
            .field("handle", &self.handle)
            .field("planner", &self.planner)
            .finish_non_exhaustive()
    }
}

/// One-shot fit with the default planner and sub-algorithms
pub fn fit<T: DataType>(
    handle: &RuntimeHandle,
    input: &[T],
    n_rows: usize,
    n_cols: usize,
    eps: T,
    min_pts: usize,
    labels: &mut [i32],
) -> MlResult<FitReport> {
    Dbscan::new(handle.clone()).fit(input, n_rows, n_cols, eps, min_pts, labels)
}
