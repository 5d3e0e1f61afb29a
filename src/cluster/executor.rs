//! Clustering execution: the dual-mode contract and a reference DBSCAN
//!
//! An executor is called twice per fit. Without a workspace it only reports
//! how many scratch bytes a run with the given batch count needs; with one
//! it labels every row. Both modes derive the size from the same
//! [`DbscanLayout`], so sizing and execution cannot drift apart.

use std::sync::Arc;

use rayon::prelude::*;

use super::algo::{AdjacencyAlgo, AlgoSelection, LabelAlgo, VertexDegreeAlgo};
use super::dataset::{squared_euclidean, DataType, DatasetView, DensityParams};
use crate::backend::Stream;
use crate::error::{MlError, MlResult};
use crate::internal_error;
use crate::memory::{DeviceAllocator, DeviceBuffer, Region, WorkspaceCarver, WorkspaceLayout};

/// Label written for rows that belong to no cluster
pub const NOISE: i32 = -1;

/// Batched clustering pass driven by the planner
pub trait ClusteringExecutor<T: DataType>: Send + Sync {
    /// Run in sizing mode (`workspace == None`) or execution mode
    ///
    /// Sizing mode performs no numeric work, leaves `labels` untouched and
    /// returns the workspace bytes an execution with `batch_count` needs. It
    /// must be a pure function of its arguments and non-increasing in
    /// `batch_count`. Execution mode writes `labels[..n_rows]` and returns
    /// the workspace bytes actually consumed.
    #[allow(clippy::too_many_arguments)]
    fn run(
        &self,
        input: &DatasetView<'_, T>,
        params: &DensityParams<T>,
        labels: &mut [i32],
        algos: AlgoSelection,
        workspace: Option<&mut DeviceBuffer<u8>>,
        batch_count: usize,
        stream: Stream,
    ) -> MlResult<usize>;
}

/// Scratch layout of [`ReferenceDbscan`] for one `(n_rows, batch_count, algos)`
#[derive(Debug, Clone)]
pub struct DbscanLayout {
    layout: WorkspaceLayout,
    batch_size: usize,
    core: Region,
    changed: Region,
    parent: Region,
    border_owner: Region,
    relabel: Region,
    adjacency: Region,
    degree: Region,
    ex_scan: Region,
    distances: Option<Region>,
    graph: Option<Region>,
}

impl DbscanLayout {
    pub fn new<T: DataType>(
        n_rows: usize,
        batch_count: usize,
        algos: AlgoSelection,
    ) -> MlResult<Self> {
        if batch_count == 0 {
            return Err(MlError::InvalidInput(
                "batch_count must be at least 1".to_string(),
            ));
        }
        let batch_size = n_rows.div_ceil(batch_count);
        let tile = batch_size.saturating_mul(n_rows);
        if tile > i32::MAX as usize {
            return Err(MlError::InvalidInput(format!(
                "{} rows in batches of {} exceed the i32 edge range",
                n_rows, batch_size
            )));
        }

        let mut layout = WorkspaceLayout::new();
        let core = layout.push::<u8>("core", n_rows);
        let changed = layout.push::<u8>("changed", 1);
        let parent = layout.push::<i32>("parent", n_rows);
        let border_owner = layout.push::<i32>("border_owner", n_rows);
        let relabel = layout.push::<i32>("relabel", n_rows);
        let adjacency = layout.push::<u8>("adjacency", tile);
        let degree = layout.push::<i32>("vertex_degree", batch_size + 1);
        let ex_scan = layout.push::<i32>("ex_scan", batch_size);
        let distances = match algos.vertex_degree {
            VertexDegreeAlgo::DistanceTile => Some(layout.push::<T>("distances", tile)),
            VertexDegreeAlgo::Direct => None,
        };
        // Worst case: every pair in the batch is adjacent
        let graph = match algos.adjacency {
            AdjacencyAlgo::Csr => Some(layout.push::<i32>("adjacency_graph", tile)),
            AdjacencyAlgo::Dense => None,
        };

        Ok(Self {
            layout,
            batch_size,
            core,
            changed,
            parent,
            border_owner,
            relabel,
            adjacency,
            degree,
            ex_scan,
            distances,
            graph,
        })
    }

    pub fn total_bytes(&self) -> usize {
        self.layout.total_bytes()
    }

    /// Rows per batch; the last batch may be shorter
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }
}

/// Batched DBSCAN over host-accessible device memory
///
/// Pass one computes vertex degrees and marks core points batch by batch.
/// Pass two revisits every batch to connect core points and to attach
/// each border point to its lowest-indexed core neighbour. Clusters are
/// numbered from 0 in order of their first row. All scratch, including the
/// compressed adjacency graph, lives in the planned workspace.
#[derive(Debug, Clone)]
pub struct ReferenceDbscan {
    allocator: Arc<dyn DeviceAllocator>,
}

impl ReferenceDbscan {
    /// `allocator` is the device allocator workspaces come from
    pub fn new(allocator: Arc<dyn DeviceAllocator>) -> Self {
        Self { allocator }
    }
}

impl<T: DataType> ClusteringExecutor<T> for ReferenceDbscan {
    fn run(
        &self,
        input: &DatasetView<'_, T>,
        params: &DensityParams<T>,
        labels: &mut [i32],
        algos: AlgoSelection,
        workspace: Option<&mut DeviceBuffer<u8>>,
        batch_count: usize,
        stream: Stream,
    ) -> MlResult<usize> {
        let n_rows = input.n_rows();
        if n_rows > i32::MAX as usize {
            return Err(MlError::InvalidInput(format!(
                "{} rows exceed the i32 label range",
                n_rows
            )));
        }
        if !self.allocator.host_accessible() {
            // Fail during planning, before any workspace is allocated
            return Err(MlError::UnsupportedMemorySpace(
                self.allocator.memory_space().as_str(),
            ));
        }
        let plan = DbscanLayout::new::<T>(n_rows, batch_count, algos)?;

        let Some(workspace) = workspace else {
            return Ok(plan.total_bytes());
        };

        if labels.len() < n_rows {
            return Err(MlError::InvalidInput(format!(
                "label buffer holds {} entries, need {}",
                labels.len(),
                n_rows
            )));
        }
        if n_rows == 0 {
            return Ok(plan.total_bytes());
        }

        tracing::debug!(
            "ReferenceDbscan::run: {} rows x {} cols, {} batches of {}, {:?}",
            n_rows,
            input.n_cols(),
            batch_count,
            plan.batch_size(),
            algos
        );

        // Host reads must wait for the stream-ordered allocation
        workspace.allocator().synchronize(stream)?;
        let bytes = workspace.host_view_mut()?;
        let mut carver = WorkspaceCarver::new(bytes, plan.layout())?;
        let mut state = LabelState {
            core: carver.take(&plan.core)?,
            changed: carver.take(&plan.changed)?,
            parent: carver.take(&plan.parent)?,
            border_owner: carver.take(&plan.border_owner)?,
            relabel: carver.take(&plan.relabel)?,
        };
        let mut tiles = BatchTiles {
            input: *input,
            eps_squared: params.eps_squared(),
            batch_size: plan.batch_size(),
            algos,
            adjacency: carver.take(&plan.adjacency)?,
            degree: carver.take(&plan.degree)?,
            ex_scan: carver.take(&plan.ex_scan)?,
            distances: match &plan.distances {
                Some(region) => Some(carver.take(region)?),
                None => None,
            },
            graph: match &plan.graph {
                Some(region) => Some(carver.take(region)?),
                None => None,
            },
        };

        cluster(&mut tiles, &mut state, params.min_pts)?;

        let clusters = state.write_labels(&mut labels[..n_rows]);
        tracing::debug!("ReferenceDbscan::run: {} clusters", clusters);
        Ok(plan.total_bytes())
    }
}

/// Per-row state that lives across batches
struct LabelState<'w> {
    core: &'w mut [u8],
    changed: &'w mut [u8],
    parent: &'w mut [i32],
    border_owner: &'w mut [i32],
    relabel: &'w mut [i32],
}

impl LabelState<'_> {
    /// Renumber components in row order and write final labels
    fn write_labels(&mut self, labels: &mut [i32]) -> usize {
        self.relabel.fill(NOISE);
        let mut next = 0;
        for (row, label) in labels.iter_mut().enumerate() {
            let anchor = if self.core[row] != 0 {
                Some(row)
            } else if self.border_owner[row] != NOISE {
                Some(self.border_owner[row] as usize)
            } else {
                None
            };
            *label = match anchor {
                Some(anchor) => {
                    let root = find(self.parent, anchor);
                    if self.relabel[root] == NOISE {
                        self.relabel[root] = next;
                        next += 1;
                    }
                    self.relabel[root]
                }
                None => NOISE,
            };
        }
        next as usize
    }
}

/// Batch-sized scratch: adjacency tile, degrees and their exclusive scan
struct BatchTiles<'a, 'w, T: DataType> {
    input: DatasetView<'a, T>,
    eps_squared: T,
    batch_size: usize,
    algos: AlgoSelection,
    adjacency: &'w mut [u8],
    degree: &'w mut [i32],
    ex_scan: &'w mut [i32],
    distances: Option<&'w mut [T]>,
    graph: Option<&'w mut [i32]>,
}

/// Neighbour lists of the rows in the current batch
enum Neighbours<'b> {
    Dense {
        adjacency: &'b [u8],
        n_rows: usize,
    },
    Csr {
        graph: &'b [i32],
        ex_scan: &'b [i32],
        degree: &'b [i32],
    },
}

impl Neighbours<'_> {
    /// Visit the neighbours of batch row `i` in ascending row order
    fn for_each(&self, i: usize, mut f: impl FnMut(usize)) {
        match self {
            Neighbours::Dense { adjacency, n_rows } => {
                let row = &adjacency[i * n_rows..(i + 1) * n_rows];
                for (j, &adjacent) in row.iter().enumerate() {
                    if adjacent != 0 {
                        f(j);
                    }
                }
            }
            Neighbours::Csr {
                graph,
                ex_scan,
                degree,
            } => {
                let start = ex_scan[i] as usize;
                let end = start + degree[i] as usize;
                for &j in &graph[start..end] {
                    f(j as usize);
                }
            }
        }
    }
}

impl<T: DataType> BatchTiles<'_, '_, T> {
    /// Fill adjacency, degrees and scan for rows `start..start + rows`
    ///
    /// Returns the number of edges in the batch.
    fn compute(&mut self, start: usize, rows: usize) -> usize {
        let n_rows = self.input.n_rows();
        let input = self.input;
        let eps_squared = self.eps_squared;
        let adjacency = &mut self.adjacency[..rows * n_rows];

        match (self.algos.vertex_degree, self.distances.as_deref_mut()) {
            (VertexDegreeAlgo::DistanceTile, Some(distances)) => {
                let distances = &mut distances[..rows * n_rows];
                distances
                    .par_chunks_mut(n_rows)
                    .enumerate()
                    .for_each(|(i, out)| {
                        let a = input.row(start + i);
                        for (j, d) in out.iter_mut().enumerate() {
                            *d = squared_euclidean(a, input.row(j));
                        }
                    });
                adjacency
                    .par_chunks_mut(n_rows)
                    .zip(distances.par_chunks(n_rows))
                    .for_each(|(adj, dist)| {
                        for (x, &d) in adj.iter_mut().zip(dist) {
                            *x = u8::from(d <= eps_squared);
                        }
                    });
            }
            _ => {
                adjacency
                    .par_chunks_mut(n_rows)
                    .enumerate()
                    .for_each(|(i, adj)| {
                        let a = input.row(start + i);
                        for (j, x) in adj.iter_mut().enumerate() {
                            *x = u8::from(squared_euclidean(a, input.row(j)) <= eps_squared);
                        }
                    });
            }
        }

        let adjacency = &*adjacency;
        self.degree[..rows]
            .par_iter_mut()
            .zip(adjacency.par_chunks(n_rows))
            .for_each(|(d, adj)| {
                *d = adj.iter().filter(|&&x| x != 0).count() as i32;
            });

        let mut total = 0usize;
        for (scan, &d) in self.ex_scan[..rows].iter_mut().zip(&self.degree[..rows]) {
            *scan = total as i32;
            total += d as usize;
        }
        self.degree[rows] = total as i32;
        total
    }

    /// Visit every batch with its neighbour lists
    fn for_each_batch<F>(&mut self, mut visit: F) -> MlResult<()>
    where
        F: FnMut(usize, usize, &Neighbours<'_>) -> MlResult<()>,
    {
        let n_rows = self.input.n_rows();
        let mut start = 0;
        while start < n_rows {
            let rows = self.batch_size.min(n_rows - start);
            let edges = self.compute(start, rows);

            let neighbours = match self.algos.adjacency {
                AdjacencyAlgo::Dense => Neighbours::Dense {
                    adjacency: &self.adjacency[..rows * n_rows],
                    n_rows,
                },
                AdjacencyAlgo::Csr => {
                    let graph = self
                        .graph
                        .as_deref_mut()
                        .ok_or_else(|| internal_error!("CSR adjacency without a graph region"))?;
                    let mut k = 0;
                    for adj in self.adjacency[..rows * n_rows].chunks(n_rows) {
                        for (j, &x) in adj.iter().enumerate() {
                            if x != 0 {
                                graph[k] = j as i32;
                                k += 1;
                            }
                        }
                    }
                    Neighbours::Csr {
                        graph: &graph[..edges],
                        ex_scan: &self.ex_scan[..rows],
                        degree: &self.degree[..rows],
                    }
                }
            };

            visit(start, rows, &neighbours)?;
            start += rows;
        }
        Ok(())
    }
}

fn cluster<T: DataType>(
    tiles: &mut BatchTiles<'_, '_, T>,
    state: &mut LabelState<'_>,
    min_pts: usize,
) -> MlResult<()> {
    let n_rows = tiles.input.n_rows();

    // Pass 1: core points
    let mut start = 0;
    while start < n_rows {
        let rows = tiles.batch_size.min(n_rows - start);
        tiles.compute(start, rows);
        for (core, &degree) in state.core[start..start + rows]
            .iter_mut()
            .zip(&tiles.degree[..rows])
        {
            *core = u8::from(degree as usize >= min_pts);
        }
        start += rows;
    }

    for (i, p) in state.parent.iter_mut().enumerate() {
        *p = i as i32;
    }
    state.border_owner.fill(NOISE);

    // Pass 2: components and border attachment
    match tiles.algos.labelling {
        LabelAlgo::UnionFind => {
            let LabelState {
                core,
                parent,
                border_owner,
                ..
            } = state;
            tiles.for_each_batch(|start, rows, neighbours| {
                for i in 0..rows {
                    let row = start + i;
                    if core[row] != 0 {
                        neighbours.for_each(i, |j| {
                            if core[j] != 0 {
                                union(parent, row, j);
                            }
                        });
                    } else {
                        attach_border(core, border_owner, row, i, neighbours);
                    }
                }
                Ok(())
            })?;
        }
        LabelAlgo::MinLabelPropagation => {
            let mut sweeps = 0;
            loop {
                sweeps += 1;
                state.changed[0] = 0;
                let LabelState {
                    core,
                    changed,
                    parent,
                    border_owner,
                    relabel,
                } = &mut *state;
                tiles.for_each_batch(|start, rows, neighbours| {
                    let core: &[u8] = core;
                    let labels: &[i32] = parent;
                    relabel[start..start + rows]
                        .par_iter_mut()
                        .enumerate()
                        .for_each(|(i, out)| {
                            let row = start + i;
                            let mut min = labels[row];
                            if core[row] != 0 {
                                neighbours.for_each(i, |j| {
                                    if core[j] != 0 && labels[j] < min {
                                        min = labels[j];
                                    }
                                });
                            }
                            *out = min;
                        });
                    for i in 0..rows {
                        let row = start + i;
                        if relabel[row] < parent[row] {
                            parent[row] = relabel[row];
                            changed[0] = 1;
                        }
                        if core[row] == 0 {
                            attach_border(core, border_owner, row, i, neighbours);
                        }
                    }
                    Ok(())
                })?;
                if state.changed[0] == 0 {
                    break;
                }
            }
            tracing::trace!("min-label propagation converged after {} sweeps", sweeps);
        }
    }
    Ok(())
}

fn attach_border(
    core: &[u8],
    border_owner: &mut [i32],
    row: usize,
    i: usize,
    neighbours: &Neighbours<'_>,
) {
    if border_owner[row] != NOISE {
        return;
    }
    let mut owner = None;
    neighbours.for_each(i, |j| {
        if owner.is_none() && core[j] != 0 {
            owner = Some(j);
        }
    });
    if let Some(owner) = owner {
        border_owner[row] = owner as i32;
    }
}

/// Root of `x`, halving paths on the way
fn find(parent: &mut [i32], mut x: usize) -> usize {
    while parent[x] as usize != x {
        let up = parent[x] as usize;
        parent[x] = parent[up];
        x = up;
    }
    x
}

/// Merge the sets of `a` and `b`; the smaller root wins
fn union(parent: &mut [i32], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[hi] = lo as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VirtualDevice;

    fn executor(device: &VirtualDevice) -> ReferenceDbscan {
        ReferenceDbscan::new(device.runtime().device_allocator())
    }

    fn run_with_workspace(
        device: &VirtualDevice,
        data: &[f32],
        n_cols: usize,
        params: DensityParams<f32>,
        algos: AlgoSelection,
        batch_count: usize,
    ) -> Vec<i32> {
        let exec = executor(device);
        let view = DatasetView::new(data, data.len() / n_cols, n_cols).unwrap();
        let mut labels = vec![i32::MIN; view.n_rows()];
        let bytes = exec
            .run(&view, &params, &mut labels, algos, None, batch_count, Stream::DEFAULT)
            .unwrap();
        let mut ws = DeviceBuffer::<u8>::with_size(device.runtime().device_allocator(), bytes)
            .unwrap();
        let used = exec
            .run(
                &view,
                &params,
                &mut labels,
                algos,
                Some(&mut ws),
                batch_count,
                Stream::DEFAULT,
            )
            .unwrap();
        assert_eq!(used, bytes);
        labels
    }

    #[test]
    fn test_sizing_mode_leaves_labels_untouched() {
        let device = VirtualDevice::with_capacity(1 << 20);
        let exec = executor(&device);
        let data = [0.0f32, 0.0, 0.5, 0.5, 9.0, 9.0];
        let view = DatasetView::new(&data, 3, 2).unwrap();
        let mut labels = vec![42; 3];
        let bytes = exec
            .run(
                &view,
                &DensityParams::new(1.0, 2),
                &mut labels,
                AlgoSelection::default(),
                None,
                1,
                Stream::DEFAULT,
            )
            .unwrap();
        assert!(bytes > 0);
        assert_eq!(labels, vec![42; 3]);
        assert_eq!(device.stats().allocations, 0);
    }

    #[test]
    fn test_workspace_non_increasing_in_batch_count() {
        for algos in AlgoSelection::all() {
            let mut previous = usize::MAX;
            for batch_count in 1..=40 {
                let bytes = DbscanLayout::new::<f64>(37, batch_count, algos)
                    .unwrap()
                    .total_bytes();
                assert!(bytes <= previous, "{:?} grew at {}", algos, batch_count);
                previous = bytes;
            }
        }
    }

    #[test]
    fn test_zero_batch_count_rejected() {
        assert!(matches!(
            DbscanLayout::new::<f32>(10, 0, AlgoSelection::default()),
            Err(MlError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_distance_tile_needs_more_workspace() {
        let direct = AlgoSelection::new(
            VertexDegreeAlgo::Direct,
            AdjacencyAlgo::Csr,
            LabelAlgo::UnionFind,
        );
        let tiled = AlgoSelection {
            vertex_degree: VertexDegreeAlgo::DistanceTile,
            ..direct
        };
        let a = DbscanLayout::new::<f32>(100, 1, direct).unwrap().total_bytes();
        let b = DbscanLayout::new::<f32>(100, 1, tiled).unwrap().total_bytes();
        assert!(b > a);
    }

    #[test]
    fn test_border_point_joins_first_core_neighbour() {
        // Rows 0..3 form a dense line; row 3 only reaches row 2
        let data = [0.0f32, 0.4, 0.8, 1.7];
        let device = VirtualDevice::with_capacity(1 << 20);
        for algos in AlgoSelection::all() {
            let labels = run_with_workspace(
                &device,
                &data,
                1,
                DensityParams::new(1.0, 3),
                algos,
                2,
            );
            assert_eq!(labels, vec![0, 0, 0, 0], "{:?}", algos);
        }
    }

    #[test]
    fn test_labels_numbered_in_row_order() {
        let data = [10.0f32, 0.0, 10.1, 0.1, 50.0];
        let device = VirtualDevice::with_capacity(1 << 20);
        for algos in AlgoSelection::all() {
            for batch_count in 1..=5 {
                let labels = run_with_workspace(
                    &device,
                    &data,
                    1,
                    DensityParams::new(0.5, 2),
                    algos,
                    batch_count,
                );
                assert_eq!(labels, vec![0, 1, 0, 1, NOISE], "{:?}/{}", algos, batch_count);
            }
        }
    }

    #[test]
    fn test_chain_connects_through_core_points() {
        // Core points chained across batch boundaries
        let data: Vec<f32> = (0..12).map(|i| i as f32 * 0.5).collect();
        let device = VirtualDevice::with_capacity(1 << 20);
        for algos in AlgoSelection::all() {
            let labels =
                run_with_workspace(&device, &data, 1, DensityParams::new(0.6, 2), algos, 4);
            assert!(labels.iter().all(|&l| l == 0), "{:?}: {:?}", algos, labels);
        }
    }

    #[test]
    fn test_execution_allocates_nothing_beyond_workspace() {
        let device = VirtualDevice::with_capacity(1 << 20);
        let data = [0.0f32, 0.1, 0.2];
        let labels = run_with_workspace(
            &device,
            &data,
            1,
            DensityParams::new(0.5, 2),
            AlgoSelection::default(),
            1,
        );
        assert_eq!(labels, vec![0, 0, 0]);
        assert_eq!(device.stats().allocations, 1);
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_csr_layout_reserves_worst_case_graph() {
        let csr = AlgoSelection::new(
            VertexDegreeAlgo::Direct,
            AdjacencyAlgo::Csr,
            LabelAlgo::UnionFind,
        );
        let dense = AlgoSelection {
            adjacency: AdjacencyAlgo::Dense,
            ..csr
        };
        let csr_bytes = DbscanLayout::new::<f32>(100, 1, csr).unwrap().total_bytes();
        let dense_bytes = DbscanLayout::new::<f32>(100, 1, dense).unwrap().total_bytes();
        assert!(csr_bytes >= dense_bytes + 100 * 100 * 4);
    }

    #[test]
    fn test_sizing_rejects_memory_the_host_cannot_read() {
        use crate::memory::MemorySpace;
        use std::ptr::NonNull;

        #[derive(Debug)]
        struct OpaqueDevice;

        impl crate::memory::Allocator for OpaqueDevice {
            fn memory_space(&self) -> MemorySpace {
                MemorySpace::Device
            }
            fn allocate(&self, bytes: usize, _stream: Stream) -> MlResult<NonNull<u8>> {
                Err(MlError::MemoryAllocationFailed(format!("{} bytes", bytes)))
            }
            unsafe fn deallocate(&self, _ptr: NonNull<u8>, _bytes: usize, _stream: Stream) {}
            unsafe fn copy_async(
                &self,
                _dst: NonNull<u8>,
                _src: NonNull<u8>,
                _bytes: usize,
                _stream: Stream,
            ) -> MlResult<()> {
                Ok(())
            }
            fn synchronize(&self, _stream: Stream) -> MlResult<()> {
                Ok(())
            }
        }

        impl DeviceAllocator for OpaqueDevice {
            unsafe fn copy_from_host_async(
                &self,
                _dst: NonNull<u8>,
                _src: *const u8,
                _bytes: usize,
                _stream: Stream,
            ) -> MlResult<()> {
                Ok(())
            }
            unsafe fn copy_to_host_async(
                &self,
                _dst: *mut u8,
                _src: NonNull<u8>,
                _bytes: usize,
                _stream: Stream,
            ) -> MlResult<()> {
                Ok(())
            }
        }

        let exec = ReferenceDbscan::new(Arc::new(OpaqueDevice));
        let data = [0.0f32, 1.0];
        let view = DatasetView::new(&data, 2, 1).unwrap();
        let err = exec
            .run(
                &view,
                &DensityParams::new(1.0, 1),
                &mut [],
                AlgoSelection::default(),
                None,
                1,
                Stream::DEFAULT,
            )
            .unwrap_err();
        assert!(matches!(err, MlError::UnsupportedMemorySpace("device")));
    }

    #[test]
    fn test_short_workspace_rejected() {
        let device = VirtualDevice::with_capacity(1 << 20);
        let exec = executor(&device);
        let data = [0.0f32, 1.0];
        let view = DatasetView::new(&data, 2, 1).unwrap();
        let mut ws = DeviceBuffer::<u8>::with_size(device.runtime().device_allocator(), 8)
            .unwrap();
        let mut labels = vec![0; 2];
        let err = exec
            .run(
                &view,
                &DensityParams::new(1.0, 1),
                &mut labels,
                AlgoSelection::default(),
                Some(&mut ws),
                1,
                Stream::DEFAULT,
            )
            .unwrap_err();
        assert!(matches!(err, MlError::InsufficientWorkspace { .. }));
    }

    #[test]
    fn test_union_find_keeps_smallest_root() {
        let mut parent: Vec<i32> = (0..6).collect();
        union(&mut parent, 4, 5);
        union(&mut parent, 5, 2);
        union(&mut parent, 0, 1);
        assert_eq!(find(&mut parent, 4), 2);
        assert_eq!(find(&mut parent, 1), 0);
        assert_ne!(find(&mut parent, 3), find(&mut parent, 2));
    }
}
