//! In-process virtual device
//!
//! A device with a fixed memory capacity whose allocations live in host
//! memory (unified-memory style), so host code may read device buffers.
//! It tracks every live allocation, enforces the capacity budget, and can
//! simulate other processes consuming device memory. Used by tests,
//! benchmarks and the CLI when no GPU is present.
//!
//! # Memory Safety
//!
//! - Frees of unknown pointers are rejected and logged, never forwarded
//!   to the global allocator
//! - Allocations still live when the last handle drops are reclaimed

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::backend::runtime::{DeviceRuntime, MemoryInfo, MemoryInfoSource};
use crate::backend::Stream;
use crate::error::{MlError, MlResult};
use crate::memory::allocator::{alloc_zeroed_host, dealloc_host};
use crate::memory::{
    Allocator, DeviceAllocator, HostAllocator, MemorySpace, SystemHostAllocator,
};
use crate::oom_error;

/// Configuration for a [`VirtualDevice`]
#[derive(Debug, Clone)]
pub struct VirtualDeviceConfig {
    /// Device name reported by the runtime
    pub name: String,
    /// Total device memory in bytes
    pub capacity_bytes: usize,
    /// Granularity allocations are charged at (power of two)
    pub alignment: usize,
}

impl Default for VirtualDeviceConfig {
    fn default() -> Self {
        VirtualDeviceConfig {
            name: "rocml-virtual-device".to_string(),
            capacity_bytes: 1024 * 1024 * 1024,
            alignment: 256,
        }
    }
}

impl VirtualDeviceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capacity_bytes(mut self, capacity_bytes: usize) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    fn validate(&self) -> MlResult<()> {
        if !self.alignment.is_power_of_two() {
            return Err(MlError::InvalidConfiguration(format!(
                "virtual device alignment {} is not a power of two",
                self.alignment
            )));
        }
        Ok(())
    }
}

/// Counters for a [`VirtualDevice`]
#[derive(Debug, Default, Clone, Serialize)]
pub struct VirtualDeviceStats {
    pub allocations: usize,
    pub deallocations: usize,
    pub failed_allocations: usize,
    /// Frees of pointers the device did not hand out (double frees included)
    pub rejected_frees: usize,
    pub copies: usize,
    pub synchronizations: usize,
    pub peak_bytes: usize,
}

#[derive(Debug, Default)]
struct DeviceState {
    used_bytes: usize,
    external_bytes: usize,
    /// address -> requested bytes
    live: HashMap<usize, usize>,
    stats: VirtualDeviceStats,
}

#[derive(Debug)]
struct DeviceInner {
    config: VirtualDeviceConfig,
    state: Mutex<DeviceState>,
    next_stream: AtomicUsize,
}

impl DeviceInner {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        // Counters stay meaningful even if a panicking test poisoned the lock
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn charge(&self, bytes: usize) -> usize {
        let alignment = self.config.alignment;
        (bytes.max(1) + alignment - 1) & !(alignment - 1)
    }

    fn free_bytes(&self, state: &DeviceState) -> usize {
        self.config
            .capacity_bytes
            .saturating_sub(state.used_bytes)
            .saturating_sub(state.external_bytes)
    }

    fn allocate(&self, bytes: usize) -> MlResult<NonNull<u8>> {
        let charged = self.charge(bytes);
        let mut state = self.lock();
        let free = self.free_bytes(&state);
        if charged > free {
            state.stats.failed_allocations += 1;
            tracing::error!(
                "VirtualDevice::allocate: {} bytes requested, {} bytes free",
                bytes,
                free
            );
            return Err(oom_error!(
                "virtual device '{}': requested {} bytes ({} charged), {} bytes free",
                self.config.name,
                bytes,
                charged,
                free
            ));
        }

        let ptr = alloc_zeroed_host(bytes)?;
        state.live.insert(ptr.as_ptr() as usize, bytes);
        state.used_bytes += charged;
        state.stats.allocations += 1;
        state.stats.peak_bytes = state.stats.peak_bytes.max(state.used_bytes);
        tracing::trace!(
            "VirtualDevice::allocate: {} bytes at {:?}, {} bytes in use",
            bytes,
            ptr,
            state.used_bytes
        );
        Ok(ptr)
    }

    fn deallocate(&self, ptr: NonNull<u8>, bytes: usize) {
        let mut state = self.lock();
        match state.live.remove(&(ptr.as_ptr() as usize)) {
            Some(recorded) => {
                if recorded != bytes {
                    tracing::warn!(
                        "VirtualDevice::deallocate: size mismatch at {:?} (allocated {}, freed {})",
                        ptr,
                        recorded,
                        bytes
                    );
                }
                state.used_bytes -= self.charge(recorded);
                state.stats.deallocations += 1;
                // SAFETY: the pointer was live and allocated with `recorded`
                unsafe { dealloc_host(ptr, recorded) };
                tracing::trace!(
                    "VirtualDevice::deallocate: {} bytes at {:?}, {} bytes in use",
                    recorded,
                    ptr,
                    state.used_bytes
                );
            }
            None => {
                state.stats.rejected_frees += 1;
                tracing::error!(
                    "VirtualDevice::deallocate: rejected free of unknown pointer {:?} ({} bytes)",
                    ptr,
                    bytes
                );
            }
        }
    }

    fn record_copy(&self) {
        self.lock().stats.copies += 1;
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if !state.live.is_empty() {
            tracing::warn!(
                "VirtualDevice '{}' dropped with {} live allocations",
                self.config.name,
                state.live.len()
            );
        }
        for (addr, bytes) in state.live.drain() {
            if let Some(ptr) = NonNull::new(addr as *mut u8) {
                // SAFETY: every live entry was allocated with its recorded size
                unsafe { dealloc_host(ptr, bytes) };
            }
        }
    }
}

/// Virtual device handle; clones share the same device
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    inner: Arc<DeviceInner>,
}

impl VirtualDevice {
    /// Create a device from a configuration
    pub fn new(config: VirtualDeviceConfig) -> MlResult<Self> {
        config.validate()?;
        tracing::debug!(
            "VirtualDevice::new: '{}' with {} MB",
            config.name,
            config.capacity_bytes / 1024 / 1024
        );
        Ok(VirtualDevice {
            inner: Arc::new(DeviceInner {
                config,
                state: Mutex::new(DeviceState::default()),
                next_stream: AtomicUsize::new(1),
            }),
        })
    }

    /// Device with default settings and the given capacity
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        VirtualDevice {
            inner: Arc::new(DeviceInner {
                config: VirtualDeviceConfig::default().with_capacity_bytes(capacity_bytes),
                state: Mutex::new(DeviceState::default()),
                next_stream: AtomicUsize::new(1),
            }),
        }
    }

    /// This device as a shareable runtime
    pub fn runtime(&self) -> Arc<dyn DeviceRuntime> {
        Arc::new(self.clone())
    }

    pub fn config(&self) -> &VirtualDeviceConfig {
        &self.inner.config
    }

    /// Hand out a new stream handle
    pub fn create_stream(&self) -> Stream {
        Stream::from_id(self.inner.next_stream.fetch_add(1, Ordering::Relaxed))
    }

    /// Simulate another process taking `bytes` of device memory
    pub fn consume_external(&self, bytes: usize) {
        let mut state = self.inner.lock();
        state.external_bytes = state.external_bytes.saturating_add(bytes);
        tracing::debug!(
            "VirtualDevice: external usage now {} bytes",
            state.external_bytes
        );
    }

    /// Simulate another process giving back `bytes` of device memory
    pub fn release_external(&self, bytes: usize) {
        let mut state = self.inner.lock();
        state.external_bytes = state.external_bytes.saturating_sub(bytes);
    }

    /// Bytes charged to rocml allocations
    pub fn used_bytes(&self) -> usize {
        self.inner.lock().used_bytes
    }

    pub fn live_allocations(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn stats(&self) -> VirtualDeviceStats {
        self.inner.lock().stats.clone()
    }
}

impl MemoryInfoSource for VirtualDevice {
    fn memory_info(&self) -> MlResult<MemoryInfo> {
        let state = self.inner.lock();
        Ok(MemoryInfo {
            free_bytes: self.inner.free_bytes(&state),
            total_bytes: self.inner.config.capacity_bytes,
        })
    }
}

impl DeviceRuntime for VirtualDevice {
    fn name(&self) -> &str {
        &self.inner.config.name
    }

    fn host_allocator(&self) -> Arc<dyn HostAllocator> {
        Arc::new(SystemHostAllocator::new())
    }

    fn device_allocator(&self) -> Arc<dyn DeviceAllocator> {
        Arc::new(VirtualDeviceAllocator {
            inner: Arc::clone(&self.inner),
        })
    }

    fn synchronize(&self, _stream: Stream) -> MlResult<()> {
        self.inner.lock().stats.synchronizations += 1;
        Ok(())
    }
}

/// Device allocator of a [`VirtualDevice`]
///
/// Work executes eagerly, so every operation is complete when the call
/// returns and stream ordering holds on any stream.
#[derive(Debug, Clone)]
pub struct VirtualDeviceAllocator {
    inner: Arc<DeviceInner>,
}

impl Allocator for VirtualDeviceAllocator {
    fn memory_space(&self) -> MemorySpace {
        MemorySpace::Device
    }

    fn allocate(&self, bytes: usize, _stream: Stream) -> MlResult<NonNull<u8>> {
        self.inner.allocate(bytes)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, _stream: Stream) {
        self.inner.deallocate(ptr, bytes)
    }

    unsafe fn copy_async(
        &self,
        dst: NonNull<u8>,
        src: NonNull<u8>,
        bytes: usize,
        _stream: Stream,
    ) -> MlResult<()> {
        std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), bytes);
        self.inner.record_copy();
        Ok(())
    }

    fn synchronize(&self, _stream: Stream) -> MlResult<()> {
        self.inner.lock().stats.synchronizations += 1;
        Ok(())
    }

    fn host_accessible(&self) -> bool {
        true
    }
}

impl DeviceAllocator for VirtualDeviceAllocator {
    unsafe fn copy_from_host_async(
        &self,
        dst: NonNull<u8>,
        src: *const u8,
        bytes: usize,
        _stream: Stream,
    ) -> MlResult<()> {
        std::ptr::copy_nonoverlapping(src, dst.as_ptr(), bytes);
        self.inner.record_copy();
        Ok(())
    }

    unsafe fn copy_to_host_async(
        &self,
        dst: *mut u8,
        src: NonNull<u8>,
        bytes: usize,
        _stream: Stream,
    ) -> MlResult<()> {
        std::ptr::copy_nonoverlapping(src.as_ptr(), dst, bytes);
        self.inner.record_copy();
        Ok(())
    }
}
