//! Sub-algorithm identifiers and selection strategies

use serde::Serialize;

use super::dataset::DatasetShape;

/// How per-row neighbour counts are computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VertexDegreeAlgo {
    /// Distances recomputed on the fly for every pair
    Direct,
    /// Distances for a whole batch materialised in workspace first
    DistanceTile,
}

/// How batch adjacency is stored between passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjacencyAlgo {
    /// Dense boolean matrix scanned directly
    Dense,
    /// Compressed rows built from an exclusive scan of degrees
    Csr,
}

/// How connected components of core points are labelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelAlgo {
    UnionFind,
    /// Repeated min-label sweeps until nothing changes
    MinLabelPropagation,
}

/// The three sub-algorithm choices passed to an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AlgoSelection {
    pub vertex_degree: VertexDegreeAlgo,
    pub adjacency: AdjacencyAlgo,
    pub labelling: LabelAlgo,
}

impl AlgoSelection {
    pub fn new(
        vertex_degree: VertexDegreeAlgo,
        adjacency: AdjacencyAlgo,
        labelling: LabelAlgo,
    ) -> Self {
        Self {
            vertex_degree,
            adjacency,
            labelling,
        }
    }

    /// Every combination, in declaration order
    pub fn all() -> Vec<AlgoSelection> {
        let mut out = Vec::with_capacity(8);
        for vd in [VertexDegreeAlgo::Direct, VertexDegreeAlgo::DistanceTile] {
            for adj in [AdjacencyAlgo::Dense, AdjacencyAlgo::Csr] {
                for lbl in [LabelAlgo::UnionFind, LabelAlgo::MinLabelPropagation] {
                    out.push(AlgoSelection::new(vd, adj, lbl));
                }
            }
        }
        out
    }
}

impl Default for AlgoSelection {
    fn default() -> Self {
        Self::new(
            VertexDegreeAlgo::DistanceTile,
            AdjacencyAlgo::Csr,
            LabelAlgo::MinLabelPropagation,
        )
    }
}

/// Picks sub-algorithms for a dataset
pub trait AlgoSelector: Send + Sync {
    fn select(&self, shape: &DatasetShape) -> AlgoSelection;
}

/// Returns the same selection regardless of shape
///
/// Stands in until a shape-driven heuristic exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedAlgoSelector {
    selection: AlgoSelection,
}

impl FixedAlgoSelector {
    pub fn new(selection: AlgoSelection) -> Self {
        Self { selection }
    }
}

impl AlgoSelector for FixedAlgoSelector {
    fn select(&self, _shape: &DatasetShape) -> AlgoSelection {
        self.selection
    }
}
