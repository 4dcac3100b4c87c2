//! Reductions along axes.

use ndkern_core::arrmeta::MetaSlot;
use ndkern_core::config::EvalContext;
use ndkern_core::iter::{SkipOutcome, StridedIter};
use ndkern_core::kernel::{KernelBuilder, KernelRequest};
use ndkern_core::shape::broadcast_strides;
use ndkern_core::{Error, Result};
use ndkern_func::callable::Callable;
use tracing::debug;

use crate::array::NdArray;

impl NdArray {
    /// Reduces `axes` of `self` with the accumulating callable `f`, such as
    /// [`ndkern_func::reduction::sum`].
    ///
    /// Each result element starts as the first element reduced into it and `f` folds in the
    /// rest, so every reduced axis must be non-empty. With `keepdims` the reduced axes stay in
    /// the result with length 1.
    pub fn reduce(&self, f: &Callable, axes: &[usize], keepdims: bool) -> Result<NdArray> {
        let mut reduced = vec![false; self.ndim()];
        for &a in axes {
            if a >= self.ndim() {
                return Err(Error::Shape(format!(
                    "axis {a} is out of range for {} axes",
                    self.ndim()
                )));
            }
            if reduced[a] {
                return Err(Error::Shape(format!("axis {a} is reduced twice")));
            }
            reduced[a] = true;
        }
        if let Some(a) = axes.iter().find(|&&a| self.shape[a] == 0) {
            return Err(Error::Shape(format!(
                "cannot reduce axis {a} of length 0 with `{}`",
                f.name()
            )));
        }
        let src = self.eval()?;
        let ctx = EvalContext::from_environment();
        let dst_tp = f.resolve(core::slice::from_ref(&src.tp))?;

        // seed with the first slice
        let first = NdArray {
            shape: src
                .shape
                .iter()
                .zip(&reduced)
                .map(|(&n, &r)| if r { 1 } else { n })
                .collect(),
            ..src.clone()
        };
        let mut dst = NdArray::empty(&first.shape, dst_tp.clone())?;
        dst.assign_with(&first, &ctx)?;

        let mut ckb = KernelBuilder::new();
        f.instantiate(
            &mut ckb,
            &dst.tp,
            &dst.meta,
            core::slice::from_ref(&src.tp),
            &[src.meta.as_slice() as &[MetaSlot]],
            KernelRequest::Strided,
        )?;
        let mut kernel = ckb.finalize()?;

        let dst_strides = broadcast_strides(&src.shape, &dst.shape, &dst.strides)?;
        let mut it = StridedIter::<2>::new(
            &src.shape,
            [dst.data_ptr(), src.data_ptr()],
            [&dst_strides, &src.strides],
        )?;
        debug!(callable = f.name(), ?axes, iter = ?it, "reduction");
        let mut seeded = dst.len();
        loop {
            let skip = match it.skip_first_visits(0, &mut seeded) {
                SkipOutcome::Finished => break,
                SkipOutcome::SkipFirst => 1,
                SkipOutcome::NoSkip => 0,
            };
            let count = it.inner_size() - skip;
            if count > 0 {
                let (ds, ss) = (it.inner_stride(0), it.inner_stride(1));
                // SAFETY: the run lies inside `dst` and `src`, which do not overlap.
                unsafe {
                    kernel.strided(
                        it.data(0).wrapping_offset(skip as isize * ds),
                        ds,
                        &[it.data(1).wrapping_offset(skip as isize * ss).cast_const()],
                        &[ss],
                        count,
                    )?;
                }
            }
            if !it.advance() {
                break;
            }
        }

        if !keepdims {
            let (shape, strides) = dst
                .shape
                .iter()
                .zip(&dst.strides)
                .zip(&reduced)
                .filter(|(_, r)| !**r)
                .map(|((&n, &s), _)| (n, s))
                .unzip();
            dst.shape = shape;
            dst.strides = strides;
        }
        Ok(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndkern_func::reduction::{max, min, sum};

    fn grid() -> anyhow::Result<NdArray> {
        Ok(NdArray::from_vec(&[2, 3], vec![1i32, 5, 3, 4, 2, 6])?)
    }

    #[test]
    fn reduces_each_axis() -> anyhow::Result<()> {
        let a = grid()?;
        assert_eq!(a.reduce(&sum()?, &[0], false)?.to_vec::<i32>()?, vec![5, 7, 9]);
        assert_eq!(a.reduce(&sum()?, &[1], false)?.to_vec::<i32>()?, vec![9, 12]);
        assert_eq!(a.reduce(&max()?, &[0, 1], false)?.to_vec::<i32>()?, vec![6]);
        let kept = a.reduce(&min()?, &[1], true)?;
        assert_eq!(kept.shape(), &[2, 1]);
        assert_eq!(kept.to_vec::<i32>()?, vec![1, 2]);
        Ok(())
    }

    #[test]
    fn reduces_transposed_and_reversed_layouts() -> anyhow::Result<()> {
        let a = grid()?.permute_axes(&[1, 0])?.reversed(0)?;
        // rows of `a`: [3, 6], [5, 2], [1, 4]
        assert_eq!(a.reduce(&max()?, &[1], false)?.to_vec::<i32>()?, vec![6, 5, 4]);
        assert_eq!(a.reduce(&sum()?, &[0], false)?.to_vec::<i32>()?, vec![9, 12]);
        Ok(())
    }

    #[test]
    fn no_axes_copies() -> anyhow::Result<()> {
        let a = grid()?;
        let r = a.reduce(&sum()?, &[], false)?;
        assert_eq!(r.to_vec::<i32>()?, a.to_vec::<i32>()?);
        assert!(!r.block().same_block(a.block()));
        Ok(())
    }

    #[test]
    fn nan_propagates_through_max() -> anyhow::Result<()> {
        let a = NdArray::from_vec(&[4], vec![1.0f64, f64::NAN, 3.0, 2.0])?;
        assert!(a.reduce(&max()?, &[0], false)?.get::<f64>(&[])?.is_nan());
        Ok(())
    }

    #[test]
    fn invalid_axes_fail() -> anyhow::Result<()> {
        let a = grid()?;
        assert!(matches!(a.reduce(&sum()?, &[2], false), Err(Error::Shape(_))));
        assert!(matches!(a.reduce(&sum()?, &[0, 0], false), Err(Error::Shape(_))));
        let empty = NdArray::empty(&[0, 3], ndkern_core::types::DType::FLOAT32)?;
        assert!(matches!(empty.reduce(&sum()?, &[0], false), Err(Error::Shape(_))));
        assert_eq!(empty.reduce(&sum()?, &[1], false)?.shape(), &[0]);
        Ok(())
    }
}
