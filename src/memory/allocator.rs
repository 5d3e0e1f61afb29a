//! Allocator capability consumed by scoped buffers
//!
//! Buffers never talk to a driver directly. Every allocation, deallocation,
//! intra-space copy and stream synchronisation goes through the allocator
//! the buffer was built with. Two disjoint families exist, [`HostAllocator`]
//! and [`DeviceAllocator`]; a buffer type picks one of them.
//!
//! # Contract for implementors
//!
//! - `allocate` never returns a dangling pointer: it either succeeds with a
//!   region of at least `bytes` bytes, zero-initialised, or fails with
//!   [`MlError::MemoryAllocationFailed`](crate::error::MlError).
//! - Returned memory is stream ordered: it is ready once work previously
//!   queued on `stream` has completed.
//! - `deallocate` is stream ordered as well and must not panic.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;

use crate::backend::Stream;
use crate::error::MlResult;
use crate::oom_error;

/// Minimum alignment of every allocation handed out by rocml allocators
pub const ALLOCATION_ALIGNMENT: usize = 256;

/// Memory space an allocator serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySpace {
    Host,
    Device,
}

impl MemorySpace {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySpace::Host => "host",
            MemorySpace::Device => "device",
        }
    }
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream-ordered allocator
pub trait Allocator: Send + Sync + fmt::Debug {
    /// Memory space the returned pointers live in
    fn memory_space(&self) -> MemorySpace;

    /// Allocate `bytes` bytes ordered on `stream`
    fn allocate(&self, bytes: usize, stream: Stream) -> MlResult<NonNull<u8>>;

    /// Return a region to the allocator, ordered on `stream`
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator with the same
    /// `bytes`, and must not have been deallocated already.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, stream: Stream);

    /// Copy `bytes` bytes between two regions of this allocator's space
    ///
    /// # Safety
    ///
    /// Both regions must be valid for `bytes` bytes and must not overlap.
    unsafe fn copy_async(
        &self,
        dst: NonNull<u8>,
        src: NonNull<u8>,
        bytes: usize,
        stream: Stream,
    ) -> MlResult<()>;

    /// Block until all work queued on `stream` has completed
    fn synchronize(&self, stream: Stream) -> MlResult<()>;

    /// Whether host code may dereference pointers from this allocator
    fn host_accessible(&self) -> bool {
        self.memory_space() == MemorySpace::Host
    }
}

/// Allocator serving host memory
pub trait HostAllocator: Allocator {}

/// Allocator serving device memory
pub trait DeviceAllocator: Allocator {
    /// Copy from host memory into device memory
    ///
    /// # Safety
    ///
    /// `dst` must be valid for `bytes` bytes of device memory from this
    /// allocator, `src` valid for `bytes` bytes of host memory.
    unsafe fn copy_from_host_async(
        &self,
        dst: NonNull<u8>,
        src: *const u8,
        bytes: usize,
        stream: Stream,
    ) -> MlResult<()>;

    /// Copy from device memory into host memory
    ///
    /// # Safety
    ///
    /// `src` must be valid for `bytes` bytes of device memory from this
    /// allocator, `dst` valid for `bytes` bytes of host memory.
    unsafe fn copy_to_host_async(
        &self,
        dst: *mut u8,
        src: NonNull<u8>,
        bytes: usize,
        stream: Stream,
    ) -> MlResult<()>;
}

/// Layout used for every host-side allocation of `bytes` bytes
pub(crate) fn host_layout(bytes: usize) -> MlResult<Layout> {
    Layout::from_size_align(bytes.max(1), ALLOCATION_ALIGNMENT)
        .map_err(|e| oom_error!("invalid layout for {} bytes: {}", bytes, e))
}

/// Zeroed allocation from the global allocator
pub(crate) fn alloc_zeroed_host(bytes: usize) -> MlResult<NonNull<u8>> {
    let layout = host_layout(bytes)?;
    // SAFETY: layout has a non-zero size
    let ptr = unsafe { alloc::alloc_zeroed(layout) };
    NonNull::new(ptr).ok_or_else(|| oom_error!("host allocation of {} bytes failed", bytes))
}

/// Release memory obtained from [`alloc_zeroed_host`]
///
/// # Safety
///
/// `ptr` must come from `alloc_zeroed_host(bytes)` and not be freed yet.
pub(crate) unsafe fn dealloc_host(ptr: NonNull<u8>, bytes: usize) {
    match host_layout(bytes) {
        Ok(layout) => alloc::dealloc(ptr.as_ptr(), layout),
        Err(e) => tracing::error!("dealloc_host: {}", e),
    }
}

/// Host allocator backed by the global Rust allocator
///
/// Host work is synchronous, so stream ordering is trivially satisfied and
/// `synchronize` has nothing to wait for.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHostAllocator;

impl SystemHostAllocator {
    pub fn new() -> Self {
        SystemHostAllocator
    }
}

impl Allocator for SystemHostAllocator {
    fn memory_space(&self) -> MemorySpace {
        MemorySpace::Host
    }

    fn allocate(&self, bytes: usize, _stream: Stream) -> MlResult<NonNull<u8>> {
        tracing::trace!("SystemHostAllocator::allocate: {} bytes", bytes);
        alloc_zeroed_host(bytes)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, _stream: Stream) {
        tracing::trace!("SystemHostAllocator::deallocate: {} bytes at {:?}", bytes, ptr);
        dealloc_host(ptr, bytes);
    }

    unsafe fn copy_async(
        &self,
        dst: NonNull<u8>,
        src: NonNull<u8>,
        bytes: usize,
        _stream: Stream,
    ) -> MlResult<()> {
        std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), bytes);
        Ok(())
    }

    fn synchronize(&self, _stream: Stream) -> MlResult<()> {
        Ok(())
    }
}

impl HostAllocator for SystemHostAllocator {}
