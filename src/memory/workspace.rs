//! Workspace layout: one description used both to size and to carve scratch memory
//!
//! An algorithm describes its scratch needs once, as an ordered list of typed
//! regions. [`WorkspaceLayout::total_bytes`] answers the sizing query and
//! [`WorkspaceCarver`] splits an allocated byte region along the same
//! offsets, so the size that was reported is exactly the size consumed.

use std::mem;

use bytemuck::Pod;

use crate::error::{MlError, MlResult};
use crate::internal_error;
use crate::memory::allocator::ALLOCATION_ALIGNMENT;

/// One typed region inside a workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub name: &'static str,
    /// Byte offset from the workspace base (aligned)
    pub offset: usize,
    /// Number of elements
    pub count: usize,
    /// Size in bytes before alignment padding
    pub bytes: usize,
}

/// Ordered, aligned list of workspace regions
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    regions: Vec<Region>,
    alignment: usize,
    end: usize,
}

fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

impl WorkspaceLayout {
    /// Layout aligned to [`ALLOCATION_ALIGNMENT`]
    pub fn new() -> Self {
        Self::with_alignment(ALLOCATION_ALIGNMENT)
    }

    /// Layout with a custom power-of-two alignment
    pub fn with_alignment(alignment: usize) -> Self {
        debug_assert!(alignment.is_power_of_two());
        Self {
            regions: Vec::new(),
            alignment,
            end: 0,
        }
    }

    /// Append a region of `count` elements of `T` and return it
    pub fn push<T: Pod>(&mut self, name: &'static str, count: usize) -> Region {
        let offset = align_up(self.end, self.alignment);
        let bytes = count.saturating_mul(mem::size_of::<T>());
        let region = Region {
            name,
            offset,
            count,
            bytes,
        };
        self.end = offset.saturating_add(bytes);
        self.regions.push(region.clone());
        region
    }

    /// Total bytes to allocate, padded to the alignment
    pub fn total_bytes(&self) -> usize {
        align_up(self.end, self.alignment)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }
}

impl Default for WorkspaceLayout {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a byte region into typed slices, in layout order
#[derive(Debug)]
pub struct WorkspaceCarver<'a> {
    rest: &'a mut [u8],
    consumed: usize,
}

impl<'a> WorkspaceCarver<'a> {
    /// Start carving `bytes`, which must hold the whole layout
    pub fn new(bytes: &'a mut [u8], layout: &WorkspaceLayout) -> MlResult<Self> {
        let required = layout.total_bytes();
        if bytes.len() < required {
            return Err(MlError::InsufficientWorkspace {
                required,
                provided: bytes.len(),
            });
        }
        Ok(Self {
            rest: bytes,
            consumed: 0,
        })
    }

    /// Take the next region as a typed slice
    ///
    /// Regions must be taken in the order they were pushed.
    pub fn take<T: Pod>(&mut self, region: &Region) -> MlResult<&'a mut [T]> {
        if region.offset < self.consumed {
            return Err(internal_error!(
                "workspace region '{}' taken out of order (offset {} < {})",
                region.name,
                region.offset,
                self.consumed
            ));
        }
        let rest = mem::take(&mut self.rest);
        let (_, rest) = rest.split_at_mut(region.offset - self.consumed);
        let (head, tail) = rest.split_at_mut(region.bytes);
        self.rest = tail;
        self.consumed = region.offset + region.bytes;

        bytemuck::try_cast_slice_mut(head).map_err(|e| {
            internal_error!("workspace region '{}' cast failed: {:?}", region.name, e)
        })
    }
}
