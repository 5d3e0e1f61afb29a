//! Batch planner: floor seeding, escalation against free memory, config

mod common;

use common::{serial, FixedMemory};
use proptest::prelude::*;
use rocml::cluster::{
    AlgoSelection, BatchPlanner, DbscanLayout, PlannerConfig, MAX_BATCH_ELEMENTS_ENV,
    MAX_ELEMENTS_PER_BATCH, MAX_ESCALATIONS_ENV,
};
use rocml::{MlError, MlResult};

fn linear(b: usize) -> MlResult<usize> {
    Ok(1000usize.saturating_sub(10 * b))
}

#[test]
fn test_linear_sizing_accepts_batch_51() {
    let planner = BatchPlanner::default();
    assert_eq!(planner.batch_count_floor(1000), 1);
    let plan = planner.plan(1000, &FixedMemory(500), linear).unwrap();
    assert_eq!(plan.batch_count, 51);
    assert_eq!(plan.free_bytes, 500);
}

#[test]
fn test_floor_above_first_fit_wins() {
    // Floor of 100 batches for 1000 rows: ceil(1000/100) * 1000 = 10_000
    let planner = BatchPlanner::new(PlannerConfig::new().with_max_elements_per_batch(10_000));
    assert_eq!(planner.batch_count_floor(1000), 100);
    let plan = planner.plan(1000, &FixedMemory(500), linear).unwrap();
    assert_eq!(plan.batch_count, 100);
    assert_eq!(plan.escalations, 0);
}

#[test]
fn test_exhaustion_when_nothing_fits() {
    let err = BatchPlanner::default()
        .plan(8, &FixedMemory(100), |_| Ok(4096))
        .unwrap_err();
    match err {
        MlError::PlanningExhausted {
            batch_count,
            workspace_bytes,
            free_bytes,
        } => {
            assert_eq!(batch_count, 8);
            assert_eq!(workspace_bytes, 4096);
            assert_eq!(free_bytes, 100);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_free_memory_sampled_once() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);
    impl rocml::MemoryInfoSource for Counting {
        fn memory_info(&self) -> MlResult<rocml::MemoryInfo> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(rocml::MemoryInfo {
                free_bytes: 500,
                total_bytes: 1000,
            })
        }
    }

    let source = Counting(AtomicUsize::new(0));
    BatchPlanner::default().plan(1000, &source, linear).unwrap();
    assert_eq!(source.0.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dbscan_workspace_plan_fits_budget() {
    let algos = AlgoSelection::default();
    let n_rows = 2000;
    let budget = 1 << 20;
    let plan = BatchPlanner::default()
        .plan(n_rows, &FixedMemory(budget), |b| {
            Ok(DbscanLayout::new::<f32>(n_rows, b, algos)?.total_bytes())
        })
        .unwrap();
    assert!(plan.workspace_bytes < budget);
    if plan.batch_count > 1 {
        let previous = DbscanLayout::new::<f32>(n_rows, plan.batch_count - 1, algos)
            .unwrap()
            .total_bytes();
        assert!(previous >= budget);
    }
}

#[test]
#[serial]
fn test_config_from_env() {
    std::env::set_var(MAX_BATCH_ELEMENTS_ENV, "1000");
    std::env::set_var(MAX_ESCALATIONS_ENV, "7");
    let config = PlannerConfig::from_env().unwrap();
    assert_eq!(config.max_elements_per_batch, 1000);
    assert_eq!(config.max_escalations, Some(7));
    std::env::remove_var(MAX_BATCH_ELEMENTS_ENV);
    std::env::remove_var(MAX_ESCALATIONS_ENV);
}

#[test]
#[serial]
fn test_config_from_env_defaults_and_errors() {
    std::env::remove_var(MAX_BATCH_ELEMENTS_ENV);
    std::env::remove_var(MAX_ESCALATIONS_ENV);
    assert_eq!(PlannerConfig::from_env().unwrap(), PlannerConfig::default());
    assert_eq!(
        PlannerConfig::default().max_elements_per_batch,
        MAX_ELEMENTS_PER_BATCH
    );

    std::env::set_var(MAX_BATCH_ELEMENTS_ENV, "lots");
    assert!(matches!(
        PlannerConfig::from_env(),
        Err(MlError::InvalidConfiguration(_))
    ));
    std::env::set_var(MAX_BATCH_ELEMENTS_ENV, "0");
    assert!(PlannerConfig::from_env().is_err());
    std::env::set_var(MAX_BATCH_ELEMENTS_ENV, "4000000000");
    assert!(matches!(
        PlannerConfig::from_env(),
        Err(MlError::InvalidConfiguration(_))
    ));
    std::env::remove_var(MAX_BATCH_ELEMENTS_ENV);
}

proptest! {
    #[test]
    fn prop_accepted_count_is_smallest_fit(
        n_rows in 1usize..400,
        base in 0usize..10_000,
        step in 1usize..200,
        free in 1usize..10_000,
    ) {
        let sizing = |b: usize| -> MlResult<usize> { Ok(base.saturating_sub(step * b)) };
        let planner = BatchPlanner::default();
        match planner.plan(n_rows, &FixedMemory(free), sizing) {
            Ok(plan) => {
                prop_assert!(plan.workspace_bytes < free);
                prop_assert!(plan.batch_count >= planner.batch_count_floor(n_rows));
                for b in planner.batch_count_floor(n_rows)..plan.batch_count {
                    prop_assert!(sizing(b).unwrap() >= free);
                }
            }
            Err(MlError::PlanningExhausted { batch_count, .. }) => {
                prop_assert_eq!(batch_count, n_rows);
                for b in 1..=n_rows {
                    prop_assert!(sizing(b).unwrap() >= free);
                }
            }
            Err(other) => prop_assert!(false, "unexpected error {}", other),
        }
    }

    #[test]
    fn prop_floor_respects_element_ceiling(n_rows in 1usize..5_000, max in 1usize..1_000_000) {
        let planner = BatchPlanner::new(PlannerConfig::new().with_max_elements_per_batch(max));
        let floor = planner.batch_count_floor(n_rows);
        prop_assert!(floor >= 1 && floor <= n_rows);
        if n_rows.div_ceil(floor) * n_rows > max {
            prop_assert_eq!(floor, n_rows);
        }
        if floor > 1 {
            prop_assert!(n_rows.div_ceil(floor - 1) * n_rows > max);
        }
    }
}
