//! Per-array metadata that sits alongside the dtype.
//!
//! Each type layer owns `meta_slots()` consecutive slots; a fixed dimension stores its stride,
//! a pointer layer stores the block its targets live in.

use crate::memblock::MemoryBlock;

/// One arrmeta slot.
#[derive(Debug, Clone)]
pub enum MetaSlot {
    /// A fixed dimension: its length and the byte distance between consecutive elements.
    Dim { size: usize, stride: isize },
    /// A pointer layer: the block keeping the targets alive and an offset added to every address.
    Block {
        block: Option<MemoryBlock>,
        offset: isize,
    },
}

impl MetaSlot {
    /// `(size, stride)` of a dimension slot.
    pub fn dim(&self) -> Option<(usize, isize)> {
        match self {
            MetaSlot::Dim { size, stride } => Some((*size, *stride)),
            MetaSlot::Block { .. } => None,
        }
    }
}

/// Arrmeta of a whole type.
pub type Arrmeta = Vec<MetaSlot>;

/// Builds the leading dimension slots of an arrmeta from a shape and strides.
pub fn dims_arrmeta(shape: &[usize], strides: &[isize]) -> Arrmeta {
    shape
        .iter()
        .zip(strides)
        .map(|(&size, &stride)| MetaSlot::Dim { size, stride })
        .collect()
}

/// Splits the leading `ndim` dimension slots into shape and strides.
pub fn shape_strides(meta: &[MetaSlot], ndim: usize) -> (Vec<usize>, Vec<isize>) {
    meta.iter()
        .take(ndim)
        .filter_map(MetaSlot::dim)
        .unzip()
}
