//! Broadcasting strided iteration over `N` operands.
//!
//! The iterator reorders, flips and coalesces the axes once at construction so that a sweep is
//! a loop of bulk inner runs. Operand 0 is the reference operand whose layout drives the axis
//! order; in assignments it is the destination.

use core::fmt;

use tracing::trace;

use crate::shape::axis_perm_from_strides;
use crate::{Error, Result};

/// Result of [`StridedIter::skip_first_visits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipOutcome {
    /// The first element of the current inner run was already seen; process the rest.
    SkipFirst,
    /// Nothing to skip in the current inner run.
    NoSkip,
    /// Skipping consumed the whole iteration space.
    Finished,
}

/// Walks the broadcast element set of `N` strided operands, one inner run at a time.
///
/// Axes are stored innermost first. Pointers are only offset, never dereferenced.
#[derive(Clone)]
pub struct StridedIter<const N: usize> {
    shape: Vec<usize>,
    strides: [Vec<isize>; N],
    index: Vec<usize>,
    data: [*mut u8; N],
    empty: bool,
}

// SAFETY: the iterator never dereferences its pointers; whoever does must own the data.
unsafe impl<const N: usize> Send for StridedIter<N> {}

impl<const N: usize> StridedIter<N> {
    /// Builds the iterator for operands already broadcast to `shape` (outermost axis first).
    pub fn new(shape: &[usize], data: [*mut u8; N], strides: [&[isize]; N]) -> Result<Self> {
        for (k, s) in strides.iter().enumerate() {
            if s.len() != shape.len() {
                return Err(Error::Shape(format!(
                    "operand {k} has {} strides for {} axes",
                    s.len(),
                    shape.len()
                )));
            }
        }
        let mut data = data;

        if shape.is_empty() {
            return Ok(Self {
                shape: vec![1],
                strides: core::array::from_fn(|_| vec![0]),
                index: vec![0],
                data,
                empty: false,
            });
        }

        let perm = axis_perm_from_strides(&strides);
        let mut it_shape: Vec<usize> = perm.iter().map(|&p| shape[p]).collect();
        let mut it_strides: [Vec<isize>; N] =
            core::array::from_fn(|k| perm.iter().map(|&p| strides[k][p]).collect());

        if it_shape.contains(&0) {
            return Ok(Self {
                shape: vec![0],
                strides: core::array::from_fn(|_| vec![0]),
                index: vec![0],
                data,
                empty: true,
            });
        }

        // walk reversed axes of the reference operand for every operand
        for i in 0..it_shape.len() {
            if N > 0 && it_strides[0][i] < 0 {
                let last = it_shape[i] as isize - 1;
                for k in 0..N {
                    data[k] = data[k].wrapping_offset(it_strides[k][i] * last);
                    it_strides[k][i] = -it_strides[k][i];
                }
            }
        }

        // coalesce, dropping length-1 axes
        let mut i = 0;
        for j in 1..it_shape.len() {
            let tiles = (0..N).all(|k| it_strides[k][j] == it_strides[k][i] * it_shape[i] as isize);
            if it_shape[i] == 1 {
                it_shape[i] = it_shape[j];
                for s in it_strides.iter_mut() {
                    s[i] = s[j];
                }
            } else if it_shape[j] == 1 {
                // drop axis j
            } else if tiles {
                it_shape[i] *= it_shape[j];
            } else {
                i += 1;
                it_shape[i] = it_shape[j];
                for s in it_strides.iter_mut() {
                    s[i] = s[j];
                }
            }
        }
        it_shape.truncate(i + 1);
        for s in it_strides.iter_mut() {
            s.truncate(i + 1);
        }
        trace!(shape = ?it_shape, strides = ?it_strides, "strided iterator coalesced");

        Ok(Self {
            index: vec![0; it_shape.len()],
            shape: it_shape,
            strides: it_strides,
            data,
            empty: false,
        })
    }

    /// Number of axes after coalescing.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Coalesced shape, innermost axis first.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Length of the current inner run.
    pub fn inner_size(&self) -> usize {
        self.shape[0]
    }

    pub fn inner_stride(&self, k: usize) -> isize {
        self.strides[k][0]
    }

    /// Pointer to the first element of operand `k` in the current inner run.
    pub fn data(&self, k: usize) -> *mut u8 {
        self.data[k]
    }

    /// Moves to the next inner run; `false` once the iteration space is exhausted.
    pub fn advance(&mut self) -> bool {
        if self.empty {
            return false;
        }
        let mut i = 1;
        while i < self.shape.len() {
            let size = self.shape[i];
            self.index[i] += 1;
            if self.index[i] == size {
                self.index[i] = 0;
                for k in 0..N {
                    self.data[k] = self.data[k].wrapping_offset(-(size as isize - 1) * self.strides[k][i]);
                }
                i += 1;
            } else {
                for k in 0..N {
                    self.data[k] = self.data[k].wrapping_offset(self.strides[k][i]);
                }
                break;
            }
        }
        let more = i < self.shape.len();
        if !more {
            self.empty = true;
        }
        more
    }

    /// Skips elements whose operand-`k` element is visited for the first time.
    ///
    /// Used by reductions whose destination (operand `k`) was initialised from the first
    /// elements that map to it: runs in which every element is a first visit are skipped and
    /// `count` decreases by their length; when only the first element of the current run is a
    /// first visit the outcome is [`SkipOutcome::SkipFirst`] and `count` decreases by one. Once
    /// `count` is zero nothing more is skipped.
    pub fn skip_first_visits(&mut self, k: usize, count: &mut usize) -> SkipOutcome {
        loop {
            if self.empty {
                return SkipOutcome::Finished;
            }
            if *count == 0 {
                return SkipOutcome::NoSkip;
            }
            let revisiting = (1..self.shape.len()).any(|i| self.strides[k][i] == 0 && self.index[i] != 0);
            if revisiting {
                return SkipOutcome::NoSkip;
            }
            if self.strides[k][0] == 0 {
                *count -= 1;
                return SkipOutcome::SkipFirst;
            }
            *count = count.saturating_sub(self.shape[0]);
            if !self.advance() {
                return SkipOutcome::Finished;
            }
        }
    }

    /// Calls `f` once per inner run, stopping at the first error.
    pub fn sweep(mut self, mut f: impl FnMut(&Self) -> Result<()>) -> Result<()> {
        if self.empty {
            return Ok(());
        }
        loop {
            f(&self)?;
            if !self.advance() {
                return Ok(());
            }
        }
    }

    /// Splits the iteration space into at most `parts` disjoint iterators along the outermost
    /// coalesced axis. Must be called before advancing.
    pub fn partition(&self, parts: usize) -> Vec<Self> {
        debug_assert!(self.index.iter().all(|&i| i == 0), "partition of a started iterator");
        if self.empty || parts == 0 {
            return Vec::new();
        }
        let axis = self.shape.len() - 1;
        let len = self.shape[axis];
        let parts = parts.min(len);
        let chunk = len.div_ceil(parts);
        (0..len)
            .step_by(chunk)
            .map(|start| {
                let mut part = self.clone();
                part.shape[axis] = chunk.min(len - start);
                for k in 0..N {
                    part.data[k] = part.data[k].wrapping_offset(start as isize * self.strides[k][axis]);
                }
                part
            })
            .collect()
    }
}

impl<const N: usize> fmt::Debug for StridedIter<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StridedIter")
            .field("shape", &self.shape)
            .field("index", &self.index)
            .field("strides", &self.strides)
            .field("data", &self.data)
            .field("empty", &self.empty)
            .finish()
    }
}
