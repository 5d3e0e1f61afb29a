//! Memory-budgeted batch planner
//!
//! Picks the smallest batch count whose workspace fits in the device's free
//! memory. The search starts from a floor that keeps every batch's pairwise
//! element count under [`MAX_ELEMENTS_PER_BATCH`], then escalates one batch
//! at a time. It assumes the workspace size is non-increasing in the batch
//! count and gives up with [`MlError::PlanningExhausted`] once more batches
//! cannot shrink it any further.

use serde::Serialize;

use crate::backend::MemoryInfoSource;
use crate::error::{MlError, MlResult};

/// Per-batch pairwise element ceiling (`batch_size * n_rows`)
///
/// Dense distance kernels misbehave above this size.
pub const MAX_ELEMENTS_PER_BATCH: usize = 2_000_000_000;

/// Overrides [`PlannerConfig::max_elements_per_batch`]
pub const MAX_BATCH_ELEMENTS_ENV: &str = "ROCML_MAX_BATCH_ELEMENTS";

/// Sets [`PlannerConfig::max_escalations`]
pub const MAX_ESCALATIONS_ENV: &str = "ROCML_MAX_ESCALATIONS";

/// Configuration for the batch planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannerConfig {
    /// Ceiling on `batch_size * n_rows` used to seed the search
    pub max_elements_per_batch: usize,

    /// Give up after this many escalations past the floor
    pub max_escalations: Option<usize>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            max_elements_per_batch: MAX_ELEMENTS_PER_BATCH,
            max_escalations: None,
        }
    }
}

impl PlannerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_elements_per_batch(mut self, max_elements_per_batch: usize) -> Self {
        self.max_elements_per_batch = max_elements_per_batch;
        self
    }

    pub fn with_max_escalations(mut self, max_escalations: usize) -> Self {
        self.max_escalations = Some(max_escalations);
        self
    }

    /// Defaults overridden by `ROCML_MAX_BATCH_ELEMENTS` and `ROCML_MAX_ESCALATIONS`
    pub fn from_env() -> MlResult<Self> {
        let mut config = Self::default();
        if let Some(value) = read_env_usize(MAX_BATCH_ELEMENTS_ENV)? {
            config.max_elements_per_batch = value;
        }
        if let Some(value) = read_env_usize(MAX_ESCALATIONS_ENV)? {
            config.max_escalations = Some(value);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MlResult<()> {
        if self.max_elements_per_batch == 0 {
            return Err(MlError::InvalidConfiguration(
                "max_elements_per_batch must be positive".to_string(),
            ));
        }
        // Per-batch edge offsets are stored as i32
        if self.max_elements_per_batch > i32::MAX as usize {
            return Err(MlError::InvalidConfiguration(format!(
                "max_elements_per_batch {} exceeds {}",
                self.max_elements_per_batch,
                i32::MAX
            )));
        }
        Ok(())
    }
}

fn read_env_usize(name: &str) -> MlResult<Option<usize>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<usize>().map(Some).map_err(|e| {
            MlError::InvalidConfiguration(format!("{}={:?} is not a count: {}", name, raw, e))
        }),
        Err(_) => Ok(None),
    }
}

/// Outcome of a planning run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    pub batch_count: usize,
    /// Rows per batch; the last batch may be shorter
    pub batch_size: usize,
    /// Workspace the accepted batch count needs
    pub workspace_bytes: usize,
    /// Free device memory observed before escalating
    pub free_bytes: usize,
    /// Batch-count increments past the floor
    pub escalations: usize,
}

/// Chooses how many row batches a clustering run uses
#[derive(Debug, Clone, Default)]
pub struct BatchPlanner {
    config: PlannerConfig,
}

impl BatchPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Smallest batch count keeping `ceil(n_rows / b) * n_rows` under the ceiling
    ///
    /// Stops at one row per batch if even that exceeds the ceiling.
    pub fn batch_count_floor(&self, n_rows: usize) -> usize {
        let limit = n_rows.max(1);
        let mut batch_count = 1;
        while batch_count < limit
            && n_rows
                .div_ceil(batch_count)
                .saturating_mul(n_rows)
                > self.config.max_elements_per_batch
        {
            batch_count += 1;
        }
        batch_count
    }

    /// Find the smallest batch count at or above the floor whose workspace fits
    ///
    /// `workspace_for(b)` is the sizing query for `b` batches. Free memory is
    /// sampled once; the plan holds only if nothing else allocates before the
    /// workspace does.
    pub fn plan<F>(
        &self,
        n_rows: usize,
        memory: &dyn MemoryInfoSource,
        mut workspace_for: F,
    ) -> MlResult<BatchPlan>
    where
        F: FnMut(usize) -> MlResult<usize>,
    {
        let floor = self.batch_count_floor(n_rows);
        let free_bytes = memory.memory_info()?.free_bytes;
        let limit = n_rows.max(floor);
        tracing::debug!(
            "BatchPlanner::plan: n_rows={}, floor={}, free={} bytes",
            n_rows,
            floor,
            free_bytes
        );

        let mut batch_count = floor;
        let mut escalations = 0;
        loop {
            let workspace_bytes = workspace_for(batch_count)?;
            if workspace_bytes < free_bytes {
                tracing::debug!(
                    "BatchPlanner::plan: accepted {} batches ({} bytes) after {} escalations",
                    batch_count,
                    workspace_bytes,
                    escalations
                );
                return Ok(BatchPlan {
                    batch_count,
                    batch_size: n_rows.div_ceil(batch_count),
                    workspace_bytes,
                    free_bytes,
                    escalations,
                });
            }

            let capped = self
                .config
                .max_escalations
                .is_some_and(|max| escalations >= max);
            if batch_count >= limit || capped {
                tracing::warn!(
                    "BatchPlanner::plan: {} batches still need {} bytes, {} free",
                    batch_count,
                    workspace_bytes,
                    free_bytes
                );
                return Err(MlError::PlanningExhausted {
                    batch_count,
                    workspace_bytes,
                    free_bytes,
                });
            }

            tracing::trace!(
                "BatchPlanner::plan: {} batches need {} bytes, escalating",
                batch_count,
                workspace_bytes
            );
            batch_count += 1;
            escalations += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryInfo;

    struct FreeMemory(usize);

    impl MemoryInfoSource for FreeMemory {
        fn memory_info(&self) -> MlResult<MemoryInfo> {
            Ok(MemoryInfo {
                free_bytes: self.0,
                total_bytes: self.0,
            })
        }
    }

    fn linear(b: usize) -> MlResult<usize> {
        Ok(1000usize.saturating_sub(10 * b))
    }

    #[test]
    fn test_floor_is_one_for_small_inputs() {
        let planner = BatchPlanner::default();
        assert_eq!(planner.batch_count_floor(0), 1);
        assert_eq!(planner.batch_count_floor(1000), 1);
        assert_eq!(planner.batch_count_floor(44_721), 1);
    }

    #[test]
    fn test_floor_bounds_pairwise_elements() {
        let planner = BatchPlanner::default();
        // 100_000^2 = 1e10 elements, needs at least 5 batches
        assert_eq!(planner.batch_count_floor(100_000), 5);
        let b = planner.batch_count_floor(1_000_000);
        assert!(1_000_000usize.div_ceil(b) * 1_000_000 <= MAX_ELEMENTS_PER_BATCH);
        assert!(1_000_000usize.div_ceil(b - 1) * 1_000_000 > MAX_ELEMENTS_PER_BATCH);
    }

    #[test]
    fn test_floor_stops_at_one_row_per_batch() {
        let planner = BatchPlanner::new(PlannerConfig::new().with_max_elements_per_batch(1));
        assert_eq!(planner.batch_count_floor(10), 10);
    }

    #[test]
    fn test_linear_workspace_accepts_first_fit() {
        let plan = BatchPlanner::default()
            .plan(1000, &FreeMemory(500), linear)
            .unwrap();
        assert_eq!(plan.batch_count, 51);
        assert_eq!(plan.workspace_bytes, 490);
        assert_eq!(plan.escalations, 50);
        assert_eq!(plan.batch_size, 20);
    }

    #[test]
    fn test_equal_workspace_is_rejected() {
        let plan = BatchPlanner::default()
            .plan(100, &FreeMemory(500), |_| Ok(500))
            .unwrap_err();
        assert!(matches!(plan, MlError::PlanningExhausted { .. }));
    }

    #[test]
    fn test_floor_seeds_search() {
        let planner = BatchPlanner::new(PlannerConfig::new().with_max_elements_per_batch(100));
        let mut seen = Vec::new();
        let plan = planner
            .plan(20, &FreeMemory(1), |b| {
                seen.push(b);
                Ok(0)
            })
            .unwrap();
        // ceil(20/4) * 20 = 100
        assert_eq!(plan.batch_count, 4);
        assert_eq!(seen, vec![4]);
    }

    #[test]
    fn test_escalation_cap() {
        let planner = BatchPlanner::new(PlannerConfig::new().with_max_escalations(3));
        let err = planner.plan(1000, &FreeMemory(500), linear).unwrap_err();
        assert!(matches!(
            err,
            MlError::PlanningExhausted {
                batch_count: 4,
                workspace_bytes: 960,
                free_bytes: 500
            }
        ));
    }

    #[test]
    fn test_sizing_error_propagates() {
        let err = BatchPlanner::default()
            .plan(10, &FreeMemory(500), |_| Err(MlError::Backend("boom".into())))
            .unwrap_err();
        assert!(matches!(err, MlError::Backend(_)));
    }

    #[test]
    fn test_config_validate() {
        assert!(PlannerConfig::default().validate().is_ok());
        assert!(PlannerConfig::new()
            .with_max_elements_per_batch(0)
            .validate()
            .is_err());
        assert!(PlannerConfig::new()
            .with_max_elements_per_batch(i32::MAX as usize)
            .validate()
            .is_ok());
        assert!(matches!(
            PlannerConfig::new()
                .with_max_elements_per_batch(i32::MAX as usize + 1)
                .validate(),
            Err(MlError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_layout_rejects_tiles_past_i32() {
        use crate::cluster::{AlgoSelection, DbscanLayout};

        let n_rows = 50_000;
        assert!(matches!(
            DbscanLayout::new::<f32>(n_rows, 1, AlgoSelection::default()),
            Err(MlError::InvalidInput(_))
        ));
        let floor = BatchPlanner::default().batch_count_floor(n_rows);
        assert!(DbscanLayout::new::<f32>(n_rows, floor, AlgoSelection::default()).is_ok());
    }
}
