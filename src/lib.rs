//! rocml - memory-budgeted clustering primitives for AMD GPUs
//!
//! Scoped, stream-ordered device buffers, a workspace layout shared by
//! sizing and execution, and a DBSCAN entry point that plans its batch count
//! against free device memory. Runs on ROCm/HIP with the `rocm` feature, or
//! on an in-process virtual device without any GPU.

#![allow(clippy::too_many_arguments)] // Kernel-style entry points take many scalars
#![allow(clippy::needless_range_loop)] // Row/batch index loops mirror device kernels
#![allow(clippy::missing_safety_doc)] // FFI bindings documented at module level

pub mod backend;
pub mod cluster;
pub mod error;
pub mod logging;
pub mod memory;

pub use backend::{
    DeviceRuntime, MemoryInfo, MemoryInfoSource, RuntimeHandle, Stream, VirtualDevice,
    VirtualDeviceConfig,
};
pub use cluster::{Dbscan, FitReport, NOISE};
pub use error::{ErrorCategory, MlError, MlResult};
pub use logging::{init_logging_default, init_logging_from_env};
pub use memory::{DeviceBuffer, HostBuffer, ScopedBuffer};
