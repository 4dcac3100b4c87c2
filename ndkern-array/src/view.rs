//! Views: new layouts or element types over the same memory block.

use itertools::Itertools;
use ndkern_core::assign::check_alignment;
use ndkern_core::shape::broadcast_strides;
use ndkern_core::types::{DType, View};
use ndkern_core::{Error, Result};
use tracing::trace;

use crate::array::NdArray;

impl NdArray {
    /// The stored bytes of an expression-typed array, typed as its innermost operand.
    pub fn storage(&self) -> NdArray {
        let tp = self.tp.storage_type().clone();
        let meta = self.meta[..tp.meta_slots().min(self.meta.len())].to_vec();
        NdArray {
            tp,
            meta,
            ..self.clone()
        }
    }

    /// The same bytes reinterpreted as elements of `tp`, which must have the element size of
    /// `self`. Layouts not aligned for `tp` yield elements of type `unaligned[tp]`.
    pub fn view_as(&self, tp: DType) -> Result<NdArray> {
        if tp.data_size() != self.tp.data_size() {
            return Err(Error::Unsupported(format!(
                "cannot view {} ({} bytes) as {tp} ({} bytes)",
                self.tp,
                self.tp.data_size(),
                tp.data_size()
            )));
        }
        if !self.tp.is_pod() || !tp.is_pod() || tp.meta_slots() != 0 || self.tp.is_expression() {
            return Err(Error::Unsupported(format!(
                "cannot view {} as {tp}: both types must be plain data",
                self.tp
            )));
        }
        let tp = match check_alignment(&tp, self.data_ptr(), &self.shape, &self.strides) {
            Ok(()) => tp,
            Err(Error::Misaligned { .. }) => {
                trace!(%tp, "view falls back to unaligned elements");
                View::unaligned(tp)?
            }
            Err(e) => return Err(e),
        };
        Ok(NdArray {
            meta: Vec::new(),
            tp,
            ..self.clone()
        })
    }

    /// Axis `i` of the result is axis `perm[i]` of `self`.
    pub fn permute_axes(&self, perm: &[usize]) -> Result<NdArray> {
        let valid = perm.len() == self.ndim() && perm.iter().sorted().copied().eq(0..self.ndim());
        if !valid {
            return Err(Error::Shape(format!(
                "{perm:?} is not a permutation of {} axes",
                self.ndim()
            )));
        }
        Ok(NdArray {
            shape: perm.iter().map(|&p| self.shape[p]).collect(),
            strides: perm.iter().map(|&p| self.strides[p]).collect(),
            ..self.clone()
        })
    }

    /// `self` with axis `axis` walked backwards.
    pub fn reversed(&self, axis: usize) -> Result<NdArray> {
        let Some(&n) = self.shape.get(axis) else {
            return Err(Error::Shape(format!(
                "axis {axis} is out of range for {} axes",
                self.ndim()
            )));
        };
        let mut out = self.clone();
        if n > 0 {
            out.offset += (n as isize - 1) * self.strides[axis];
        }
        out.strides[axis] = -self.strides[axis];
        Ok(out)
    }

    /// `self` stretched to `shape` without copying; broadcast axes get stride zero.
    pub fn broadcast_to(&self, shape: &[usize]) -> Result<NdArray> {
        Ok(NdArray {
            strides: broadcast_strides(shape, &self.shape, &self.strides)?,
            shape: shape.to_vec(),
            ..self.clone()
        })
    }
}
