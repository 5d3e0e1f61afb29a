//! Device backends
//!
//! The virtual device is always available. The HIP backend for AMD GPUs is
//! compiled with the `rocm` feature.

#[cfg(feature = "rocm")]
pub mod hip;
pub mod runtime;
pub mod stream;
pub mod virtual_device;

#[cfg(feature = "rocm")]
pub use hip::{HipDeviceAllocator, HipRuntime};
pub use runtime::{DeviceRuntime, MemoryInfo, MemoryInfoSource, RuntimeHandle};
pub use stream::Stream;
pub use virtual_device::{
    VirtualDevice, VirtualDeviceAllocator, VirtualDeviceConfig, VirtualDeviceStats,
};
