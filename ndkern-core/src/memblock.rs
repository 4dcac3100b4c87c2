//! Reference counted, zero-initialised raw memory.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::{Error, Result};

/// Largest alignment any dtype may request.
pub const MAX_ALIGN: usize = 16;

struct RawBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the block is plain bytes; synchronising access to them is the user's job, as with any raw buffer.
unsafe impl Send for RawBlock {}
unsafe impl Sync for RawBlock {}

impl Drop for RawBlock {
    fn drop(&mut self) {
        // SAFETY: `ptr` was returned by `alloc_zeroed` with exactly this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// Shared ownership of a raw allocation.
///
/// Array data and the targets of `pointer[T]` arrmeta both live in memory blocks; cloning a
/// block only bumps the reference count.
#[derive(Clone)]
pub struct MemoryBlock(Arc<RawBlock>);

impl MemoryBlock {
    /// Allocates `size` zeroed bytes aligned to `align`.
    pub fn zeroed(size: usize, align: usize) -> Result<Self> {
        if align > MAX_ALIGN {
            return Err(Error::Unsupported(format!(
                "alignment {align} exceeds the maximum of {MAX_ALIGN}"
            )));
        }
        let layout = Layout::from_size_align(size.max(1), align.max(1))
            .map_err(|e| Error::Shape(e.to_string()))?;
        // SAFETY: the layout has a nonzero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            Error::Shape(format!("allocation of {size} bytes failed"))
        })?;
        Ok(Self(Arc::new(RawBlock { ptr, layout })))
    }

    /// Start of the block.
    pub fn as_ptr(&self) -> *mut u8 {
        self.0.ptr.as_ptr()
    }

    /// Usable size in bytes.
    pub fn len(&self) -> usize {
        self.0.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two handles refer to the same allocation.
    pub fn same_block(&self, other: &MemoryBlock) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live handles on this allocation.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl core::fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("ptr", &self.as_ptr())
            .field("len", &self.len())
            .finish()
    }
}

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct Chunk([u8; 16]);

/// Scratch buffer aligned for every dtype, used for temporaries inside kernels.
pub struct AlignedBuf {
    chunks: Vec<Chunk>,
}

impl AlignedBuf {
    pub fn new(size: usize) -> Self {
        Self {
            chunks: vec![Chunk([0; 16]); size.div_ceil(16).max(1)],
        }
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.chunks.as_mut_ptr().cast()
    }

    pub fn len(&self) -> usize {
        self.chunks.len() * 16
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}
