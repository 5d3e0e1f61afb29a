//! Runtime handle: allocators, stream and free-memory introspection

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::backend::Stream;
use crate::error::MlResult;
use crate::memory::{DeviceAllocator, HostAllocator};

/// Snapshot of device memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub free_bytes: usize,
    pub total_bytes: usize,
}

impl MemoryInfo {
    pub fn used_bytes(&self) -> usize {
        self.total_bytes.saturating_sub(self.free_bytes)
    }

    pub fn free_mb(&self) -> usize {
        self.free_bytes / 1024 / 1024
    }
}

/// Source of free-memory snapshots
///
/// A snapshot is not a reservation: other consumers may allocate between
/// the query and any later allocation.
pub trait MemoryInfoSource: Send + Sync {
    fn memory_info(&self) -> MlResult<MemoryInfo>;
}

/// A device runtime: allocators, synchronisation and memory introspection
pub trait DeviceRuntime: MemoryInfoSource + fmt::Debug {
    /// Human-readable device name
    fn name(&self) -> &str;

    fn host_allocator(&self) -> Arc<dyn HostAllocator>;

    fn device_allocator(&self) -> Arc<dyn DeviceAllocator>;

    /// Block until all work queued on `stream` has completed
    fn synchronize(&self, stream: Stream) -> MlResult<()>;
}

/// Handle passed to every primitive
///
/// Bundles the runtime with the stream work is queued on. The free-memory
/// source defaults to the runtime itself and can be replaced, which lets
/// tests script contention deterministically.
#[derive(Clone)]
pub struct RuntimeHandle {
    runtime: Arc<dyn DeviceRuntime>,
    stream: Stream,
    memory_source: Option<Arc<dyn MemoryInfoSource>>,
}

impl RuntimeHandle {
    /// Handle working on the default stream
    pub fn new(runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self {
            runtime,
            stream: Stream::DEFAULT,
            memory_source: None,
        }
    }

    /// Queue work on `stream`
    pub fn with_stream(mut self, stream: Stream) -> Self {
        self.stream = stream;
        self
    }

    /// Replace the free-memory source
    pub fn with_memory_info_source(mut self, source: Arc<dyn MemoryInfoSource>) -> Self {
        self.memory_source = Some(source);
        self
    }

    pub fn runtime(&self) -> &Arc<dyn DeviceRuntime> {
        &self.runtime
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    pub fn get_host_allocator(&self) -> Arc<dyn HostAllocator> {
        self.runtime.host_allocator()
    }

    pub fn get_device_allocator(&self) -> Arc<dyn DeviceAllocator> {
        self.runtime.device_allocator()
    }

    /// Free/total device memory from the configured source
    pub fn memory_info(&self) -> MlResult<MemoryInfo> {
        match &self.memory_source {
            Some(source) => source.memory_info(),
            None => self.runtime.memory_info(),
        }
    }

    /// Synchronize the handle's stream
    pub fn synchronize(&self) -> MlResult<()> {
        self.runtime.synchronize(self.stream)
    }
}

impl MemoryInfoSource for RuntimeHandle {
    fn memory_info(&self) -> MlResult<MemoryInfo> {
        RuntimeHandle::memory_info(self)
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("runtime", &self.runtime.name())
            .field("stream", &self.stream)
            .field("memory_source_override", &self.memory_source.is_some())
            .finish()
    }
}
