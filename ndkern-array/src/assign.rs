//! Broadcasting assignment between arrays, casting and evaluation.

use std::thread;

use ndkern_core::assign::{
    ErrorMode, StridedOperand, assign_strided, assignment_kernel, check_alignment,
};
use ndkern_core::config::EvalContext;
use ndkern_core::iter::StridedIter;
use ndkern_core::kernel::KernelRequest;
use ndkern_core::shape::broadcast_strides;
use ndkern_core::types::{Convert, DType};
use ndkern_core::{Error, Result};
use tracing::debug;

use crate::array::NdArray;

impl NdArray {
    /// Assigns `src`, broadcast to the shape of `self`, under the environment's settings.
    pub fn assign(&mut self, src: &NdArray) -> Result<()> {
        self.assign_with(src, &EvalContext::from_environment())
    }

    /// Assigns `src`, broadcast to the shape of `self`, converting elements under `ctx.errmode`.
    ///
    /// When a converting assignment would replicate each source element more than
    /// `ctx.broadcast_copy_ratio` times, the source is converted once into a temporary that is
    /// then copied. A source sharing the block of `self` is copied out first.
    pub fn assign_with(&mut self, src: &NdArray, ctx: &EvalContext) -> Result<()> {
        if src.block.same_block(&self.block) {
            debug!("assignment source aliases the destination, copying it first");
            let copy = src.eval_copy(ctx)?;
            return self.assign_with(&copy, ctx);
        }
        let src_strides = broadcast_strides(&self.shape, &src.shape, &src.strides)?;
        if src.tp != self.tp && !src.is_empty() && self.len() / src.len() > ctx.broadcast_copy_ratio {
            debug!(
                dst = %self.tp,
                src = %src.tp,
                ratio = self.len() / src.len(),
                "converting the broadcast source once"
            );
            let mut tmp = NdArray::empty(&src.shape, self.tp.clone())?;
            tmp.assign_with(src, ctx)?;
            return self.assign_with(&tmp, ctx);
        }
        // SAFETY: both operands address elements of their own blocks, which differ.
        unsafe {
            assign_strided(
                StridedOperand::new(&self.tp, &self.meta, self.data_ptr(), &self.strides),
                StridedOperand::new(&src.tp, &src.meta, src.data_ptr(), &src_strides),
                &self.shape,
                ctx,
            )
        }
    }

    /// [`NdArray::assign_with`] split across up to `threads` scoped threads, each running its
    /// own kernel on a disjoint part of `self`.
    ///
    /// Arrays smaller than `ctx.parallel_min_elements` are assigned on the calling thread.
    pub fn assign_parallel(&mut self, src: &NdArray, ctx: &EvalContext, threads: usize) -> Result<()> {
        if threads <= 1 || self.len() < ctx.parallel_min_elements {
            return self.assign_with(src, ctx);
        }
        if src.block.same_block(&self.block) {
            let copy = src.eval_copy(ctx)?;
            return self.assign_parallel(&copy, ctx, threads);
        }
        let src_strides = broadcast_strides(&self.shape, &src.shape, &src.strides)?;
        check_alignment(&self.tp, self.data_ptr(), &self.shape, &self.strides)?;
        check_alignment(&src.tp, src.data_ptr(), &self.shape, &src_strides)?;
        let it = StridedIter::<2>::new(
            &self.shape,
            [self.data_ptr(), src.data_ptr()],
            [&self.strides, &src_strides],
        )?;
        let parts = it.partition(threads);
        debug!(parts = parts.len(), elements = self.len(), "parallel assignment");

        let (dst_tp, dst_meta) = (&self.tp, &self.meta);
        let (src_tp, src_meta) = (&src.tp, &src.meta);
        let outcomes: Vec<Result<()>> = thread::scope(|s| {
            let handles: Vec<_> = parts
                .into_iter()
                .map(|part| {
                    s.spawn(move || {
                        let mut kernel = assignment_kernel(
                            dst_tp,
                            dst_meta,
                            src_tp,
                            src_meta,
                            KernelRequest::Strided,
                            ctx.errmode,
                        )?;
                        part.sweep(|it| {
                            // SAFETY: parts are disjoint runs of operands checked above.
                            unsafe {
                                kernel.strided(
                                    it.data(0),
                                    it.inner_stride(0),
                                    &[it.data(1).cast_const()],
                                    &[it.inner_stride(1)],
                                    it.inner_size(),
                                )
                            }
                        })
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        });
        outcomes.into_iter().collect()
    }

    /// A lazily converted view: reading an element of the result converts it from `self` to
    /// `tp` under `errmode`; the data stays in the block of `self`.
    pub fn cast(&self, tp: DType, errmode: ErrorMode) -> Result<NdArray> {
        if tp.is_dim() || tp.is_symbolic() {
            return Err(Error::Unsupported(format!("cannot cast elements to {tp}")));
        }
        Ok(NdArray {
            tp: Convert::make(tp, self.tp.clone(), errmode),
            ..self.clone()
        })
    }

    /// A new row-major array of element type `tp` holding the converted values of `self`.
    pub fn as_type(&self, tp: DType, ctx: &EvalContext) -> Result<NdArray> {
        let mut out = NdArray::empty(&self.shape, tp)?;
        out.assign_with(self, ctx)?;
        Ok(out)
    }

    /// Evaluates an expression-typed array into a new array of its value type; other arrays
    /// are returned as they are.
    pub fn eval(&self) -> Result<NdArray> {
        if !self.tp.is_expression() {
            return Ok(self.clone());
        }
        self.as_type(self.tp.value_type().clone(), &EvalContext::from_environment())
    }

    fn eval_copy(&self, ctx: &EvalContext) -> Result<NdArray> {
        let mut out = self.empty_like()?;
        out.assign_with(self, ctx)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndkern_core::error::RangeReason;

    fn ctx(errmode: ErrorMode) -> EvalContext {
        EvalContext::default().with_errmode(errmode)
    }

    #[test]
    fn broadcasting_assignment() -> anyhow::Result<()> {
        let mut dst = NdArray::empty(&[2, 3], DType::INT64)?;
        let row = NdArray::from_vec(&[3], vec![1i16, 2, 3])?;
        dst.assign_with(&row, &ctx(ErrorMode::Fractional))?;
        assert_eq!(dst.to_vec::<i64>()?, vec![1, 2, 3, 1, 2, 3]);

        let col = NdArray::from_vec(&[2, 1], vec![7i64, 8])?;
        dst.assign_with(&col, &ctx(ErrorMode::Fractional))?;
        assert_eq!(dst.to_vec::<i64>()?, vec![7, 7, 7, 8, 8, 8]);

        let bad = NdArray::from_vec(&[2], vec![1i64, 2])?;
        assert!(matches!(
            dst.assign_with(&bad, &ctx(ErrorMode::Fractional)),
            Err(Error::Broadcast { .. })
        ));
        Ok(())
    }

    #[test]
    fn replicated_conversions_go_through_a_temporary() -> anyhow::Result<()> {
        let c = EvalContext {
            broadcast_copy_ratio: 2,
            ..ctx(ErrorMode::Fractional)
        };
        let mut dst = NdArray::empty(&[4, 3], DType::FLOAT32)?;
        let row = NdArray::from_vec(&[3], vec![1i8, -2, 3])?;
        dst.assign_with(&row, &c)?;
        assert_eq!(dst.to_vec::<f32>()?, [1.0, -2.0, 3.0].repeat(4));

        let frac = NdArray::from_vec(&[1], vec![0.5f64])?;
        let mut ints = NdArray::empty(&[8], DType::INT32)?;
        match ints.assign_with(&frac, &c) {
            Err(Error::ConversionRange { reason, .. }) => assert_eq!(reason, RangeReason::Fractional),
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn aliased_source_is_copied_first() -> anyhow::Result<()> {
        let mut a = NdArray::from_vec(&[4], vec![1u32, 2, 3, 4])?;
        let rev = a.reversed(0)?;
        a.assign_with(&rev, &ctx(ErrorMode::None))?;
        assert_eq!(a.to_vec::<u32>()?, vec![4, 3, 2, 1]);
        Ok(())
    }

    #[test]
    fn parallel_assignment_matches_serial() -> anyhow::Result<()> {
        let c = EvalContext {
            parallel_min_elements: 0,
            ..ctx(ErrorMode::Fractional)
        };
        let src = NdArray::from_vec(&[6, 5], (0..30).collect::<Vec<i32>>())?;
        let mut dst = NdArray::empty(&[6, 5], DType::FLOAT64)?;
        dst.assign_parallel(&src, &c, 4)?;
        assert_eq!(dst.to_vec::<f64>()?, (0..30).map(f64::from).collect::<Vec<_>>());

        let bad = NdArray::from_vec(&[6, 5], vec![0.5f64; 30])?;
        let mut ints = NdArray::empty(&[6, 5], DType::INT8)?;
        assert!(ints.assign_parallel(&bad, &c, 3).is_err());
        Ok(())
    }

    #[test]
    fn lazy_cast_and_eval() -> anyhow::Result<()> {
        let a = NdArray::from_vec(&[3], vec![1.0f64, 2.5, -3.0])?;
        let lazy = a.cast(DType::INT32, ErrorMode::None)?;
        assert!(lazy.tp().is_expression());
        assert!(lazy.block().same_block(a.block()));
        let ints = lazy.eval()?;
        assert_eq!(ints.tp(), &DType::INT32);
        assert_eq!(ints.to_vec::<i32>()?, vec![1, 2, -3]);

        let strict = a.cast(DType::INT32, ErrorMode::Fractional)?;
        assert!(strict.eval().is_err());

        let wide = a.as_type(DType::COMPLEX128, &ctx(ErrorMode::Inexact))?;
        assert_eq!(wide.get::<num_complex::Complex64>(&[1])?, num_complex::Complex64::new(2.5, 0.0));
        Ok(())
    }
}
