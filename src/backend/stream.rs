//! Stream handle shared by every backend

use std::ffi::c_void;

/// Opaque execution stream handle
///
/// Work queued on one stream completes in submission order. The null handle
/// is the default stream. The handle does not own the underlying driver
/// object; whoever created the stream destroys it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Stream {
    raw: usize,
}

impl Stream {
    /// The default (null) stream
    pub const DEFAULT: Stream = Stream { raw: 0 };

    /// Wrap a raw driver stream pointer
    pub fn from_raw(ptr: *mut c_void) -> Self {
        Stream { raw: ptr as usize }
    }

    /// Build a handle from a backend-chosen identifier
    pub(crate) fn from_id(id: usize) -> Self {
        Stream { raw: id }
    }

    /// Raw driver stream pointer (null for the default stream)
    pub fn as_raw(&self) -> *mut c_void {
        self.raw as *mut c_void
    }

    pub fn is_default(&self) -> bool {
        self.raw == 0
    }
}
