//! Shared fixtures for integration tests
//!
//! Everything runs on a [`VirtualDevice`], so no GPU is needed. Each test
//! builds its own device; datasets are generated once and shared.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rocml::backend::{MemoryInfo, MemoryInfoSource, RuntimeHandle, VirtualDevice};
use rocml::MlResult;
pub use serial_test::serial;

/// Three well-separated Gaussian-ish blobs of 40 points in 2-D plus 5 outliers
///
/// Rows are ordered blob by blob, outliers last.
pub static THREE_BLOBS: Lazy<Vec<f64>> = Lazy::new(|| {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let centres = [(0.0, 0.0), (20.0, 0.0), (0.0, 20.0)];
    let mut data = Vec::with_capacity((3 * 40 + 5) * 2);
    for &(cx, cy) in &centres {
        for _ in 0..40 {
            data.push(cx + rng.gen_range(-1.0..1.0));
            data.push(cy + rng.gen_range(-1.0..1.0));
        }
    }
    for i in 0..5 {
        data.push(100.0 + 30.0 * i as f64);
        data.push(-100.0);
    }
    data
});

pub const THREE_BLOBS_ROWS: usize = 125;

/// Virtual device with `capacity` bytes
pub fn device(capacity: usize) -> VirtualDevice {
    VirtualDevice::with_capacity(capacity)
}

pub fn handle(device: &VirtualDevice) -> RuntimeHandle {
    RuntimeHandle::new(device.runtime())
}

/// Fail unless every device allocation has been handed back
pub fn assert_no_leak(device: &VirtualDevice) {
    assert_eq!(
        device.live_allocations(),
        0,
        "{} device allocations still live",
        device.live_allocations()
    );
    assert_eq!(device.used_bytes(), 0);
}

/// Reports the device's free memory, then lets another consumer take `steal` bytes
///
/// Models memory claimed by unrelated work between the planner's snapshot
/// and the workspace allocation.
pub struct ContendedMemory {
    device: VirtualDevice,
    steal: usize,
    queries: AtomicUsize,
}

impl ContendedMemory {
    pub fn new(device: &VirtualDevice, steal: usize) -> Arc<Self> {
        Arc::new(Self {
            device: device.clone(),
            steal,
            queries: AtomicUsize::new(0),
        })
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl MemoryInfoSource for ContendedMemory {
    fn memory_info(&self) -> MlResult<MemoryInfo> {
        let info = self.device.memory_info()?;
        if self.queries.fetch_add(1, Ordering::SeqCst) == 0 {
            self.device.consume_external(self.steal);
        }
        Ok(info)
    }
}

/// Fixed free-memory report
pub struct FixedMemory(pub usize);

impl MemoryInfoSource for FixedMemory {
    fn memory_info(&self) -> MlResult<MemoryInfo> {
        Ok(MemoryInfo {
            free_bytes: self.0,
            total_bytes: self.0,
        })
    }
}

/// Number of distinct non-noise labels
pub fn cluster_count(labels: &[i32]) -> usize {
    let mut seen: Vec<i32> = labels.iter().copied().filter(|&l| l >= 0).collect();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}
