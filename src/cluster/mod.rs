//! Density-based clustering under a device memory budget
//!
//! [`Dbscan::fit`] is the entry point. It asks a [`BatchPlanner`] for the
//! smallest batch count whose workspace fits in free device memory, then
//! runs a [`ClusteringExecutor`] with exactly that workspace.

pub mod algo;
pub mod dataset;
pub mod dbscan;
pub mod executor;
pub mod planner;

pub use algo::{
    AdjacencyAlgo, AlgoSelection, AlgoSelector, FixedAlgoSelector, LabelAlgo, VertexDegreeAlgo,
};
pub use dataset::{squared_euclidean, DataType, DatasetShape, DatasetView, DensityParams};
pub use dbscan::{fit, Dbscan, FitReport};
pub use executor::{ClusteringExecutor, DbscanLayout, ReferenceDbscan, NOISE};
pub use planner::{
    BatchPlan, BatchPlanner, PlannerConfig, MAX_BATCH_ELEMENTS_ENV, MAX_ELEMENTS_PER_BATCH,
    MAX_ESCALATIONS_ENV,
};
