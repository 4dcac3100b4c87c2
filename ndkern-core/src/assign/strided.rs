//! Strided assignment driver.

use tracing::trace;

use super::make_assignment_kernel;
use crate::arrmeta::MetaSlot;
use crate::config::EvalContext;
use crate::iter::StridedIter;
use crate::kernel::{KernelBuilder, KernelRequest};
use crate::types::DType;
use crate::{Error, Result};

/// One operand of a strided assignment: element type, its arrmeta, first element and strides.
#[derive(Debug, Clone, Copy)]
pub struct StridedOperand<'a> {
    pub tp: &'a DType,
    pub meta: &'a [MetaSlot],
    pub data: *mut u8,
    pub strides: &'a [isize],
}

impl<'a> StridedOperand<'a> {
    pub fn new(tp: &'a DType, meta: &'a [MetaSlot], data: *mut u8, strides: &'a [isize]) -> Self {
        Self {
            tp,
            meta,
            data,
            strides,
        }
    }
}

/// Fails with [`Error::Misaligned`] unless every element addressed by `data`, `shape` and
/// `strides` is aligned for `tp`.
pub fn check_alignment(tp: &DType, data: *const u8, shape: &[usize], strides: &[isize]) -> Result<()> {
    let align = tp.data_alignment();
    if align <= 1 || shape.contains(&0) {
        return Ok(());
    }
    let misaligned = (data as usize) % align != 0
        || shape
            .iter()
            .zip(strides)
            .any(|(&n, &s)| n > 1 && s.unsigned_abs() % align != 0);
    if misaligned {
        return Err(Error::Misaligned {
            tp: tp.clone(),
            align,
        });
    }
    Ok(())
}

/// Assigns `src` into `dst` over `shape`, converting element types under `ctx.errmode`.
///
/// Both operands must already be broadcast to `shape`; a zero source stride replicates the
/// source along that axis. The first element that fails to convert, in sweep order, aborts
/// the assignment with its error. Elements swept before it keep their new values.
///
/// # Safety
///
/// Every element addressed by either operand must be valid for its type and arrmeta, and
/// `dst` elements must not overlap `src` elements.
pub unsafe fn assign_strided(
    dst: StridedOperand<'_>,
    src: StridedOperand<'_>,
    shape: &[usize],
    ctx: &EvalContext,
) -> Result<()> {
    check_alignment(dst.tp, dst.data, shape, dst.strides)?;
    check_alignment(src.tp, src.data, shape, src.strides)?;

    let mut it = StridedIter::<2>::new(shape, [dst.data, src.data], [dst.strides, src.strides])?;
    if it.is_empty() {
        return Ok(());
    }
    let contiguous = it.inner_stride(0) == dst.tp.data_size() as isize
        && it.inner_stride(1) == src.tp.data_size() as isize;
    let kernreq = if contiguous {
        KernelRequest::Contiguous
    } else {
        KernelRequest::Strided
    };

    let mut ckb = KernelBuilder::new();
    make_assignment_kernel(
        &mut ckb, dst.tp, dst.meta, src.tp, src.meta, kernreq, ctx.errmode,
    )?;
    let mut kernel = ckb.finalize()?;
    trace!(dst = %dst.tp, src = %src.tp, ?kernreq, frames = kernel.len(), "strided assignment");

    let (dst_stride, src_stride) = (it.inner_stride(0), it.inner_stride(1));
    loop {
        // SAFETY: the iterator only yields runs inside the operands the caller vouched for.
        unsafe {
            kernel.strided(
                it.data(0),
                dst_stride,
                &[it.data(1).cast_const()],
                &[src_stride],
                it.inner_size(),
            )?;
        }
        if !it.advance() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::ErrorMode;
    use crate::error::RangeReason;
    use crate::shape::{broadcast_strides, contiguous_strides};

    fn ctx(errmode: ErrorMode) -> EvalContext {
        EvalContext::default().with_errmode(errmode)
    }

    #[test]
    fn float64_to_int32_respects_error_mode() -> anyhow::Result<()> {
        let src = [1.0f64, 2.0, -3.0, 4.0];
        let mut dst = [0i32; 4];
        let strides_src = [8isize];
        let strides_dst = [4isize];
        let assign = |dst: &mut [i32; 4], src: &[f64; 4], mode| unsafe {
            assign_strided(
                StridedOperand::new(&DType::INT32, &[], dst.as_mut_ptr().cast(), &strides_dst),
                StridedOperand::new(&DType::FLOAT64, &[], src.as_ptr().cast_mut().cast(), &strides_src),
                &[4],
                &ctx(mode),
            )
        };
        assign(&mut dst, &src, ErrorMode::Fractional)?;
        assert_eq!(dst, [1, 2, -3, 4]);

        let src = [1.0f64, 1.5, -3.0, 4.0];
        let err = assign(&mut dst, &src, ErrorMode::Fractional).unwrap_err();
        match err {
            Error::ConversionRange {
                value,
                src,
                dst,
                reason,
                ..
            } => {
                assert_eq!(value, "1.5");
                assert_eq!((dst, src), (DType::INT32, DType::FLOAT64));
                assert_eq!(reason, RangeReason::Fractional);
            }
            other => panic!("unexpected error {other}"),
        }

        let src = [1.2f64, 2.7, -3.5, 4.0];
        assign(&mut dst, &src, ErrorMode::None)?;
        assert_eq!(dst, [1, 2, -3, 4]);
        Ok(())
    }

    #[test]
    fn broadcasts_a_row_into_a_matrix() -> anyhow::Result<()> {
        let row = [10i16, 20, 30];
        let mut out = [0i64; 6];
        let shape = [2, 3];
        let src_strides = broadcast_strides(&shape, &[3], &[2])?;
        let dst_strides = contiguous_strides(&shape, 8);
        unsafe {
            assign_strided(
                StridedOperand::new(&DType::INT64, &[], out.as_mut_ptr().cast(), &dst_strides),
                StridedOperand::new(&DType::INT16, &[], row.as_ptr().cast_mut().cast(), &src_strides),
                &shape,
                &EvalContext::default(),
            )?;
        }
        assert_eq!(out, [10, 20, 30, 10, 20, 30]);
        Ok(())
    }

    #[test]
    fn transposed_copy_follows_strides() -> anyhow::Result<()> {
        let src: Vec<f32> = (0..6).map(|v| v as f32).collect();
        let mut dst = [0f32; 6];
        // dst[i][j] = src[j][i] for a 2x3 destination over a 3x2 source
        unsafe {
            assign_strided(
                StridedOperand::new(&DType::FLOAT32, &[], dst.as_mut_ptr().cast(), &[12, 4]),
                StridedOperand::new(&DType::FLOAT32, &[], src.as_ptr().cast_mut().cast(), &[4, 8]),
                &[2, 3],
                &EvalContext::default(),
            )?;
        }
        assert_eq!(dst, [0.0, 2.0, 4.0, 1.0, 3.0, 5.0]);
        Ok(())
    }

    #[test]
    fn misaligned_operands_are_rejected() {
        let buf = [0u64; 4];
        let base: *const u8 = buf.as_ptr().cast();
        assert!(check_alignment(&DType::FLOAT64, base, &[3], &[8]).is_ok());
        assert!(matches!(
            check_alignment(&DType::FLOAT64, base.wrapping_add(1), &[3], &[8]),
            Err(Error::Misaligned { align: 8, .. })
        ));
        assert!(check_alignment(&DType::FLOAT64, base, &[3], &[4]).is_err());
        // strides of length-1 axes never move the pointer
        assert!(check_alignment(&DType::FLOAT64, base, &[1, 3], &[3, 8]).is_ok());
        assert!(check_alignment(&DType::INT8, base.wrapping_add(1), &[3], &[1]).is_ok());
    }
}
