//! Memory management: allocator capability, scoped buffers, workspace layout
//!
//! # Pattern
//!
//! 1. A runtime hands out a host and a device [`Allocator`]
//! 2. [`ScopedBuffer`] owns a typed region from one of them and frees it
//!    on release or drop
//! 3. [`WorkspaceLayout`] describes an algorithm's scratch memory once, for
//!    both the sizing query and the real run

pub mod allocator;
pub mod buffer;
pub mod workspace;

pub use allocator::{
    Allocator, DeviceAllocator, HostAllocator, MemorySpace, SystemHostAllocator,
    ALLOCATION_ALIGNMENT,
};
pub use buffer::{BufferState, DeviceBuffer, HostBuffer, ScopedBuffer};
pub use workspace::{Region, WorkspaceCarver, WorkspaceLayout};
