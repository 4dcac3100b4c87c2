use core::marker::PhantomData;
use core::ptr;

use super::ErrorMode;
use crate::error::RangeReason;
use crate::kernel::{Children, KernelBuilder, KernelFrame, KernelRequest};
use crate::types::{BuiltinScalar, DType, TypeId};
use crate::{Error, Result};

/// Converts `S` values into `D` values under a fixed error mode.
pub struct BuiltinAssign<D, S> {
    mode: ErrorMode,
    _marker: PhantomData<fn(S) -> D>,
}

impl<D: BuiltinScalar, S: BuiltinScalar> BuiltinAssign<D, S> {
    pub fn new(mode: ErrorMode) -> Self {
        Self {
            mode,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn convert(&self, s: S) -> Result<D> {
        D::from_scalar(s.to_scalar(), self.mode).map_err(|reason| range_error::<D, S>(s, self.mode, reason))
    }
}

fn range_error<D: BuiltinScalar, S: BuiltinScalar>(
    s: S,
    mode: ErrorMode,
    reason: RangeReason,
) -> Error {
    let mut value = String::new();
    let _ = s.fmt_value(&mut value);
    Error::ConversionRange {
        value,
        src: DType::of::<S>(),
        dst: DType::of::<D>(),
        mode,
        reason,
    }
}

impl<D: BuiltinScalar, S: BuiltinScalar> KernelFrame for BuiltinAssign<D, S> {
    unsafe fn single(&mut self, _: Children<'_>, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        // SAFETY: the caller passes aligned `D` and `S` elements.
        unsafe {
            let s = ptr::read(src[0].cast::<S>());
            ptr::write(dst.cast::<D>(), self.convert(s)?);
        }
        Ok(())
    }

    unsafe fn strided(
        &mut self,
        _: Children<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> Result<()> {
        let (mut d, mut s) = (dst, src[0]);
        for _ in 0..count {
            // SAFETY: as in `single`, for each of the `count` elements.
            unsafe {
                let v = ptr::read(s.cast::<S>());
                ptr::write(d.cast::<D>(), self.convert(v)?);
            }
            d = d.wrapping_offset(dst_stride);
            s = s.wrapping_offset(src_stride[0]);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "BuiltinAssign"
    }
}

/// Places the frame converting builtin `src` to builtin `dst`.
pub fn make_builtin_assignment(
    ckb: &mut KernelBuilder,
    dst: TypeId,
    src: TypeId,
    kernreq: KernelRequest,
    mode: ErrorMode,
) -> Result<usize> {
    let unsupported = || Error::NoConversion {
        dst: DType::Builtin(dst),
        src: DType::Builtin(src),
    };
    crate::with_builtin_type!(dst, D => {
        crate::with_builtin_type!(src, S => {
            Ok(ckb.emplace(BuiltinAssign::<D, S>::new(mode), kernreq))
        }, _ => Err(unsupported()))
    }, _ => Err(unsupported()))
}
