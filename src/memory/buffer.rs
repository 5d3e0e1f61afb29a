//! Scoped, allocator-backed typed buffers
//!
//! A [`ScopedBuffer`] owns one contiguous region obtained from an
//! [`Allocator`]. It is the Rust counterpart of the temporary buffers GPU
//! primitives allocate around a kernel launch:
//!
//! ```ignore
//! let mut temp = DeviceBuffer::<f32>::new(handle.get_device_allocator());
//! temp.resize(n, stream)?;
//! // ... queue kernels that use temp.as_mut_ptr() on `stream` ...
//! temp.release(stream);
//! ```
//!
//! # Invariants
//!
//! - `capacity >= len` at all times.
//! - The pointer is non-null iff `capacity > 0`.
//! - Capacity only grows on `resize`; shrinking just moves the logical end.
//! - The buffer is the sole owner of its region. It is neither `Clone` nor
//!   `Copy`, so a region is deallocated exactly once: by `release`, or on
//!   drop if still live.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Index, IndexMut};
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;

use bytemuck::Pod;

use crate::backend::Stream;
use crate::error::{MlError, MlResult};
use crate::memory::allocator::{Allocator, DeviceAllocator, HostAllocator};
use crate::oom_error;

/// Ownership state of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Constructed or resized; drop deallocates whatever capacity is held
    Live,
    /// Explicitly released; holds nothing until resized again
    Released,
}

/// RAII buffer owning `capacity` elements of `T` from allocator `A`
pub struct ScopedBuffer<T: Pod, A: ?Sized + Allocator> {
    allocator: Arc<A>,
    size: usize,
    capacity: usize,
    data: Option<NonNull<T>>,
    state: BufferState,
    _marker: PhantomData<T>,
}

/// Buffer in host memory
pub type HostBuffer<T> = ScopedBuffer<T, dyn HostAllocator>;

/// Buffer in device memory
pub type DeviceBuffer<T> = ScopedBuffer<T, dyn DeviceAllocator>;

// SAFETY: the buffer exclusively owns its region, so moving it to another
// thread moves the only handle to that memory. Allocators are Send + Sync.
unsafe impl<T: Pod + Send, A: ?Sized + Allocator> Send for ScopedBuffer<T, A> {}

impl<T: Pod, A: ?Sized + Allocator> ScopedBuffer<T, A> {
    /// Create an empty buffer; no allocation happens
    pub fn new(allocator: Arc<A>) -> Self {
        ScopedBuffer {
            allocator,
            size: 0,
            capacity: 0,
            data: None,
            state: BufferState::Live,
            _marker: PhantomData,
        }
    }

    /// Create a buffer holding `n` elements
    ///
    /// Allocates on the default stream and synchronizes it before returning,
    /// so the memory is ready for immediate synchronous use.
    pub fn with_size(allocator: Arc<A>, n: usize) -> MlResult<Self> {
        let mut buffer = Self::new(allocator);
        if n > 0 {
            let bytes = Self::bytes_for(n)?;
            let ptr = buffer.allocator.allocate(bytes, Stream::DEFAULT)?;
            buffer.data = Some(ptr.cast::<T>());
            buffer.capacity = n;
            buffer.size = n;
            // On failure the buffer drops here and frees the region
            buffer.allocator.synchronize(Stream::DEFAULT)?;
        }
        Ok(buffer)
    }

    fn bytes_for(n: usize) -> MlResult<usize> {
        n.checked_mul(mem::size_of::<T>()).ok_or_else(|| {
            oom_error!(
                "{} elements of {} bytes overflow the address space",
                n,
                mem::size_of::<T>()
            )
        })
    }

    /// Number of live elements
    pub fn len(&self) -> usize {
        self.size
    }

    /// Alias of [`len`](Self::len)
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of elements the current region can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn is_released(&self) -> bool {
        self.state == BufferState::Released
    }

    /// Allocator this buffer draws from
    pub fn allocator(&self) -> &Arc<A> {
        &self.allocator
    }

    /// Raw pointer to the first element, null when nothing is allocated
    pub fn as_ptr(&self) -> *const T {
        self.data.map_or(ptr::null(), |p| p.as_ptr() as *const T)
    }

    /// Mutable raw pointer to the first element, null when nothing is allocated
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.data.map_or(ptr::null_mut(), |p| p.as_ptr())
    }

    /// Pointer to the start of the logical range
    pub fn begin(&self) -> *const T {
        self.as_ptr()
    }

    /// Pointer one past the logical range `[0, len)`
    pub fn end(&self) -> *const T {
        self.as_ptr().wrapping_add(self.size)
    }

    /// Change the logical size
    ///
    /// Growing past capacity allocates a region of exactly `new_size`
    /// elements on `stream`, copies the live elements over on `stream`, and
    /// hands the old region back on `stream`. Shrinking never reallocates;
    /// elements past the new end stay resident but unreachable.
    pub fn resize(&mut self, new_size: usize, stream: Stream) -> MlResult<()> {
        if self.capacity < new_size {
            let new_bytes = Self::bytes_for(new_size)?;
            let new_data = self.allocator.allocate(new_bytes, stream)?;
            tracing::trace!(
                "ScopedBuffer::resize: growing {} -> {} elements ({} bytes)",
                self.capacity,
                new_size,
                new_bytes
            );

            if let Some(old) = self.data {
                let old_bytes = self.capacity * mem::size_of::<T>();
                let live_bytes = self.size.min(new_size) * mem::size_of::<T>();
                if live_bytes > 0 {
                    // SAFETY: both regions come from this allocator and hold
                    // at least `live_bytes` bytes; fresh memory never overlaps.
                    let copied = unsafe {
                        self.allocator
                            .copy_async(new_data, old.cast::<u8>(), live_bytes, stream)
                    };
                    if let Err(e) = copied {
                        // SAFETY: new_data was allocated above with new_bytes
                        unsafe { self.allocator.deallocate(new_data, new_bytes, stream) };
                        return Err(e);
                    }
                }
                // SAFETY: old was allocated with old_bytes and is still owned
                unsafe {
                    self.allocator
                        .deallocate(old.cast::<u8>(), old_bytes, stream)
                };
            }

            self.data = Some(new_data.cast::<T>());
            self.capacity = new_size;
        }
        self.size = new_size;
        self.state = BufferState::Live;
        Ok(())
    }

    /// Reset the logical size to zero, keeping the region
    pub fn clear(&mut self) {
        self.size = 0;
    }

    /// Deallocate the region now, ordered on `stream`
    ///
    /// Safe to call repeatedly; a released buffer drops without touching
    /// the allocator.
    pub fn release(&mut self, stream: Stream) {
        if let Some(ptr) = self.data.take() {
            let bytes = self.capacity * mem::size_of::<T>();
            // SAFETY: ptr was allocated with `bytes` and is still owned
            unsafe { self.allocator.deallocate(ptr.cast::<u8>(), bytes, stream) };
        }
        self.capacity = 0;
        self.size = 0;
        self.state = BufferState::Released;
    }

    /// Host view of the live elements
    ///
    /// Fails with [`MlError::UnsupportedMemorySpace`] when the allocator's
    /// memory cannot be dereferenced by the host.
    pub fn host_view(&self) -> MlResult<&[T]> {
        self.check_host_accessible()?;
        Ok(self.live_slice())
    }

    /// Mutable host view of the live elements
    pub fn host_view_mut(&mut self) -> MlResult<&mut [T]> {
        self.check_host_accessible()?;
        Ok(self.live_slice_mut())
    }

    fn check_host_accessible(&self) -> MlResult<()> {
        if self.allocator.host_accessible() {
            Ok(())
        } else {
            Err(MlError::UnsupportedMemorySpace(
                self.allocator.memory_space().as_str(),
            ))
        }
    }

    fn live_slice(&self) -> &[T] {
        match self.data {
            // SAFETY: the region holds `capacity >= size` initialised
            // elements (allocators hand out zeroed memory, T is Pod).
            Some(p) => unsafe { slice::from_raw_parts(p.as_ptr(), self.size) },
            None => &[],
        }
    }

    fn live_slice_mut(&mut self) -> &mut [T] {
        match self.data {
            // SAFETY: see live_slice; &mut self guarantees exclusivity
            Some(p) => unsafe { slice::from_raw_parts_mut(p.as_ptr(), self.size) },
            None => &mut [],
        }
    }
}

impl<T: Pod> ScopedBuffer<T, dyn HostAllocator> {
    pub fn as_slice(&self) -> &[T] {
        self.live_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.live_slice_mut()
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.live_slice().iter()
    }

    /// Element access without a bounds check
    ///
    /// # Safety
    ///
    /// `pos` must be below [`capacity`](Self::capacity).
    pub unsafe fn get_unchecked(&self, pos: usize) -> &T {
        &*self.as_ptr().add(pos)
    }

    /// Mutable element access without a bounds check
    ///
    /// # Safety
    ///
    /// `pos` must be below [`capacity`](Self::capacity).
    pub unsafe fn get_unchecked_mut(&mut self, pos: usize) -> &mut T {
        &mut *self.as_mut_ptr().add(pos)
    }
}

impl<T: Pod> Index<usize> for ScopedBuffer<T, dyn HostAllocator> {
    type Output = T;

    fn index(&self, pos: usize) -> &T {
        &self.live_slice()[pos]
    }
}

impl<T: Pod> IndexMut<usize> for ScopedBuffer<T, dyn HostAllocator> {
    fn index_mut(&mut self, pos: usize) -> &mut T {
        &mut self.live_slice_mut()[pos]
    }
}

impl<T: Pod> ScopedBuffer<T, dyn DeviceAllocator> {
    /// Upload `src` into the first `src.len()` elements, ordered on `stream`
    pub fn copy_from_host(&mut self, src: &[T], stream: Stream) -> MlResult<()> {
        if src.len() > self.size {
            return Err(MlError::InvalidInput(format!(
                "source has {} elements, buffer holds {}",
                src.len(),
                self.size
            )));
        }
        let Some(dst) = self.data else {
            return Ok(());
        };
        let bytes = mem::size_of_val(src);
        // SAFETY: dst holds at least `size >= src.len()` elements
        unsafe {
            self.allocator.copy_from_host_async(
                dst.cast::<u8>(),
                src.as_ptr() as *const u8,
                bytes,
                stream,
            )
        }
    }

    /// Download the first `dst.len()` elements into `dst`, ordered on `stream`
    ///
    /// The caller synchronizes `stream` before reading `dst`.
    pub fn copy_to_host(&self, dst: &mut [T], stream: Stream) -> MlResult<()> {
        if dst.len() > self.size {
            return Err(MlError::InvalidInput(format!(
                "destination has {} elements, buffer holds {}",
                dst.len(),
                self.size
            )));
        }
        let Some(src) = self.data else {
            return Ok(());
        };
        let bytes = mem::size_of_val(dst);
        // SAFETY: src holds at least `size >= dst.len()` elements
        unsafe {
            self.allocator.copy_to_host_async(
                dst.as_mut_ptr() as *mut u8,
                src.cast::<u8>(),
                bytes,
                stream,
            )
        }
    }
}

impl<T: Pod, A: ?Sized + Allocator> Drop for ScopedBuffer<T, A> {
    fn drop(&mut self) {
        if let Some(ptr) = self.data.take() {
            let bytes = self.capacity * mem::size_of::<T>();
            // SAFETY: ptr was allocated with `bytes` and is still owned
            unsafe {
                self.allocator
                    .deallocate(ptr.cast::<u8>(), bytes, Stream::DEFAULT)
            };
        }
    }
}

impl<T: Pod, A: ?Sized + Allocator> fmt::Debug for ScopedBuffer<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedBuffer")
            .field("space", &self.allocator.memory_space())
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .field("data", &self.as_ptr())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::allocator::{MemorySpace, SystemHostAllocator};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Host allocator that counts calls
    #[derive(Debug, Default)]
    struct CountingAllocator {
        inner: SystemHostAllocator,
        allocs: AtomicUsize,
        deallocs: AtomicUsize,
        syncs: AtomicUsize,
        live_bytes: AtomicUsize,
    }

    impl Allocator for CountingAllocator {
        fn memory_space(&self) -> MemorySpace {
            MemorySpace::Host
        }

        fn allocate(&self, bytes: usize, stream: Stream) -> MlResult<NonNull<u8>> {
            self.allocs.fetch_add(1, Ordering::SeqCst);
            self.live_bytes.fetch_add(bytes, Ordering::SeqCst);
            self.inner.allocate(bytes, stream)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, stream: Stream) {
            self.deallocs.fetch_add(1, Ordering::SeqCst);
            self.live_bytes.fetch_sub(bytes, Ordering::SeqCst);
            self.inner.deallocate(ptr, bytes, stream)
        }

        unsafe fn copy_async(
            &self,
            dst: NonNull<u8>,
            src: NonNull<u8>,
            bytes: usize,
            stream: Stream,
        ) -> MlResult<()> {
            self.inner.copy_async(dst, src, bytes, stream)
        }

        fn synchronize(&self, _stream: Stream) -> MlResult<()> {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl HostAllocator for CountingAllocator {}

    fn counting() -> (Arc<CountingAllocator>, Arc<dyn HostAllocator>) {
        let alloc = Arc::new(CountingAllocator::default());
        let dyn_alloc: Arc<dyn HostAllocator> = alloc.clone();
        (alloc, dyn_alloc)
    }

    #[test]
    fn test_new_does_not_allocate() {
        let (counts, alloc) = counting();
        let buf = HostBuffer::<f32>::new(alloc);
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.capacity(), 0);
        assert!(buf.as_ptr().is_null());
        drop(buf);
        assert_eq!(counts.allocs.load(Ordering::SeqCst), 0);
        assert_eq!(counts.deallocs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_with_size_allocates_and_synchronizes() {
        let (counts, alloc) = counting();
        let buf = HostBuffer::<u32>::with_size(alloc, 16).unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.capacity(), 16);
        assert!(!buf.as_ptr().is_null());
        assert_eq!(counts.allocs.load(Ordering::SeqCst), 1);
        assert_eq!(counts.syncs.load(Ordering::SeqCst), 1);
        assert_eq!(counts.live_bytes.load(Ordering::SeqCst), 64);
        drop(buf);
        assert_eq!(counts.deallocs.load(Ordering::SeqCst), 1);
        assert_eq!(counts.live_bytes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resize_preserves_prefix() {
        let (_, alloc) = counting();
        let mut buf = HostBuffer::<i32>::with_size(alloc, 4).unwrap();
        buf.as_mut_slice().copy_from_slice(&[1, 2, 3, 4]);
        buf.resize(10, Stream::DEFAULT).unwrap();
        assert_eq!(buf.len(), 10);
        assert_eq!(&buf.as_slice()[..4], &[1, 2, 3, 4]);
        assert!(buf.as_slice()[4..].iter().all(|&v| v == 0));
    }

    #[test]
    fn test_resize_down_keeps_capacity() {
        let (counts, alloc) = counting();
        let mut buf = HostBuffer::<i32>::with_size(alloc, 8).unwrap();
        buf[5] = 55;
        buf.resize(2, Stream::DEFAULT).unwrap();
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.capacity(), 8);
        // Growing back within capacity exposes the resident data again
        buf.resize(6, Stream::DEFAULT).unwrap();
        assert_eq!(buf[5], 55);
        assert_eq!(counts.allocs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_then_drop_deallocates_once() {
        let (counts, alloc) = counting();
        let mut buf = HostBuffer::<f64>::with_size(alloc, 3).unwrap();
        buf.release(Stream::DEFAULT);
        assert!(buf.is_released());
        assert_eq!(buf.capacity(), 0);
        assert!(buf.as_ptr().is_null());
        buf.release(Stream::DEFAULT);
        drop(buf);
        assert_eq!(counts.allocs.load(Ordering::SeqCst), 1);
        assert_eq!(counts.deallocs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resize_after_release_goes_live() {
        let (counts, alloc) = counting();
        let mut buf = HostBuffer::<u8>::with_size(alloc, 3).unwrap();
        buf.release(Stream::DEFAULT);
        buf.resize(5, Stream::DEFAULT).unwrap();
        assert_eq!(buf.state(), BufferState::Live);
        assert_eq!(buf.capacity(), 5);
        drop(buf);
        assert_eq!(counts.allocs.load(Ordering::SeqCst), 2);
        assert_eq!(counts.deallocs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear_keeps_memory() {
        let (counts, alloc) = counting();
        let mut buf = HostBuffer::<u16>::with_size(alloc, 7).unwrap();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 7);
        assert_eq!(counts.deallocs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_begin_end_span_logical_range() {
        let (_, alloc) = counting();
        let mut buf = HostBuffer::<u64>::with_size(alloc, 5).unwrap();
        buf.resize(3, Stream::DEFAULT).unwrap();
        let span = (buf.end() as usize - buf.begin() as usize) / mem::size_of::<u64>();
        assert_eq!(span, 3);
        assert_eq!(buf.iter().count(), 3);
    }

    #[test]
    fn test_unchecked_access() {
        let (_, alloc) = counting();
        let mut buf = HostBuffer::<i32>::with_size(alloc, 2).unwrap();
        unsafe {
            *buf.get_unchecked_mut(1) = 9;
            assert_eq!(*buf.get_unchecked(1), 9);
        }
    }

    #[test]
    #[should_panic]
    fn test_index_past_len_panics() {
        let (_, alloc) = counting();
        let buf = HostBuffer::<i32>::with_size(alloc, 2).unwrap();
        let _ = buf[2];
    }
}
