//! ROCm/HIP runtime for AMD GPUs
//!
//! Device memory comes from the stream-ordered HIP allocator and is not
//! host accessible; host memory comes from [`SystemHostAllocator`].

mod ffi;

use std::ptr::{self, NonNull};
use std::sync::Arc;

use crate::backend::runtime::{DeviceRuntime, MemoryInfo, MemoryInfoSource};
use crate::backend::Stream;
use crate::backend_error;
use crate::error::{MlError, MlResult};
use crate::memory::{Allocator, DeviceAllocator, HostAllocator, MemorySpace, SystemHostAllocator};
use crate::oom_error;

fn check(code: i32, what: &str) -> MlResult<()> {
    if code == ffi::HIP_SUCCESS {
        Ok(())
    } else {
        Err(backend_error!(
            "{} failed with code {} ({})",
            what,
            code,
            ffi::error_string(code)
        ))
    }
}

/// HIP runtime bound to one device
#[derive(Debug)]
pub struct HipRuntime {
    device_id: i32,
    name: String,
}

impl HipRuntime {
    /// Initialise HIP and select `device_id`
    pub fn new(device_id: i32) -> MlResult<Self> {
        // SAFETY: plain FFI calls with valid out-pointers
        unsafe {
            check(ffi::hipInit(0), "hipInit")?;
            let mut count: i32 = 0;
            check(ffi::hipGetDeviceCount(&mut count), "hipGetDeviceCount")?;
            if device_id < 0 || device_id >= count {
                return Err(backend_error!(
                    "device {} not found ({} devices present)",
                    device_id,
                    count
                ));
            }
            check(ffi::hipSetDevice(device_id), "hipSetDevice")?;
        }
        tracing::debug!("HipRuntime::new: using device {}", device_id);
        Ok(HipRuntime {
            device_id,
            name: format!("hip:{}", device_id),
        })
    }

    pub fn device_id(&self) -> i32 {
        self.device_id
    }
}

impl MemoryInfoSource for HipRuntime {
    fn memory_info(&self) -> MlResult<MemoryInfo> {
        let mut free: usize = 0;
        let mut total: usize = 0;
        // SAFETY: valid out-pointers
        let result = unsafe { ffi::hipMemGetInfo(&mut free, &mut total) };
        if result != ffi::HIP_SUCCESS {
            return Err(MlError::MemoryQueryFailed(format!(
                "hipMemGetInfo failed with code {}",
                result
            )));
        }
        Ok(MemoryInfo {
            free_bytes: free,
            total_bytes: total,
        })
    }
}

impl DeviceRuntime for HipRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    fn host_allocator(&self) -> Arc<dyn HostAllocator> {
        Arc::new(SystemHostAllocator::new())
    }

    fn device_allocator(&self) -> Arc<dyn DeviceAllocator> {
        Arc::new(HipDeviceAllocator)
    }

    fn synchronize(&self, stream: Stream) -> MlResult<()> {
        // SAFETY: the stream handle was created by the caller and is alive
        check(
            unsafe { ffi::hipStreamSynchronize(stream.as_raw()) },
            "hipStreamSynchronize",
        )
    }
}

/// Stream-ordered HIP device allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct HipDeviceAllocator;

impl HipDeviceAllocator {
    unsafe fn memcpy(
        dst: *mut u8,
        src: *const u8,
        bytes: usize,
        kind: i32,
        stream: Stream,
    ) -> MlResult<()> {
        let result = ffi::hipMemcpyAsync(
            dst as *mut std::ffi::c_void,
            src as *const std::ffi::c_void,
            bytes,
            kind,
            stream.as_raw(),
        );
        if result != ffi::HIP_SUCCESS {
            return Err(MlError::MemoryCopyFailed(format!(
                "hipMemcpyAsync (kind {}) of {} bytes failed with code {}",
                kind, bytes, result
            )));
        }
        Ok(())
    }
}

impl Allocator for HipDeviceAllocator {
    fn memory_space(&self) -> MemorySpace {
        MemorySpace::Device
    }

    fn allocate(&self, bytes: usize, stream: Stream) -> MlResult<NonNull<u8>> {
        let mut ptr: *mut std::ffi::c_void = ptr::null_mut();
        // SAFETY: valid out-pointer; stream is alive
        let result = unsafe { ffi::hipMallocAsync(&mut ptr, bytes, stream.as_raw()) };
        if result != ffi::HIP_SUCCESS {
            tracing::error!(
                "HipDeviceAllocator::allocate: hipMallocAsync failed with code {} for {} bytes",
                result,
                bytes
            );
            return Err(oom_error!(
                "hipMallocAsync failed with code {} for {} bytes",
                result,
                bytes
            ));
        }
        let ptr = NonNull::new(ptr as *mut u8)
            .ok_or_else(|| oom_error!("hipMallocAsync returned null for {} bytes", bytes))?;
        // SAFETY: ptr was just allocated with `bytes` bytes on this stream
        let result = unsafe {
            ffi::hipMemsetAsync(ptr.as_ptr() as *mut std::ffi::c_void, 0, bytes, stream.as_raw())
        };
        if let Err(e) = check(result, "hipMemsetAsync") {
            // SAFETY: ptr is owned here and not yet handed out
            unsafe { self.deallocate(ptr, bytes, stream) };
            return Err(e);
        }
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, stream: Stream) {
        let result = ffi::hipFreeAsync(ptr.as_ptr() as *mut std::ffi::c_void, stream.as_raw());
        if result != ffi::HIP_SUCCESS {
            tracing::error!(
                "HipDeviceAllocator::deallocate: hipFreeAsync failed with code {} ({} bytes)",
                result,
                bytes
            );
        }
    }

    unsafe fn copy_async(
        &self,
        dst: NonNull<u8>,
        src: NonNull<u8>,
        bytes: usize,
        stream: Stream,
    ) -> MlResult<()> {
        Self::memcpy(
            dst.as_ptr(),
            src.as_ptr(),
            bytes,
            ffi::HIP_MEMCPY_DEVICE_TO_DEVICE,
            stream,
        )
    }

    fn synchronize(&self, stream: Stream) -> MlResult<()> {
        // SAFETY: the stream handle was created by the caller and is alive
        check(
            unsafe { ffi::hipStreamSynchronize(stream.as_raw()) },
            "hipStreamSynchronize",
        )
    }
}

impl DeviceAllocator for HipDeviceAllocator {
    unsafe fn copy_from_host_async(
        &self,
        dst: NonNull<u8>,
        src: *const u8,
        bytes: usize,
        stream: Stream,
    ) -> MlResult<()> {
        Self::memcpy(
            dst.as_ptr(),
            src,
            bytes,
            ffi::HIP_MEMCPY_HOST_TO_DEVICE,
            stream,
        )
    }

    unsafe fn copy_to_host_async(
        &self,
        dst: *mut u8,
        src: NonNull<u8>,
        bytes: usize,
        stream: Stream,
    ) -> MlResult<()> {
        Self::memcpy(
            dst,
            src.as_ptr(),
            bytes,
            ffi::HIP_MEMCPY_DEVICE_TO_HOST,
            stream,
        )
    }
}
