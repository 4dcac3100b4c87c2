//! Assignment kernels: copying and converting values between two dtypes.
//!
//! [`make_assignment_kernel`] picks the cheapest strategy that honours the error mode:
//!
//! 1. identical plain-data types copy bytes,
//! 2. expression types are converted through an aligned temporary,
//! 3. builtin pairs get a frame monomorphised for the two Rust scalars,
//! 4. compound types (dimensions, options, structs, strings...) build their own frames,
//! 5. anything else goes through the [`KindConverters`] registry.
//!
//! A pair none of these handle is an [`Error::NoConversion`].

use core::fmt;
use core::str::FromStr;

use tracing::debug;

use crate::arrmeta::MetaSlot;
use crate::kernel::{Kernel, KernelBuilder, KernelRequest};
use crate::types::{DType, builtin_lossless};
use crate::{Error, Result};

mod builtin;
mod copy;
mod expr;
mod kind;
mod strided;

pub use builtin::{BuiltinAssign, make_builtin_assignment};
pub use copy::ByteCopy;
pub(crate) use copy::make_byte_copy;
pub use kind::{ConverterFn, KindConverters, kind_converters};
pub use strided::{StridedOperand, assign_strided, check_alignment};

/// How strictly an assignment checks that values survive conversion.
///
/// Modes are ordered: a value accepted under a stricter mode is accepted under every looser one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ErrorMode {
    /// Wrap, truncate and saturate silently.
    None,
    /// Reject values outside the destination range.
    Overflow,
    /// Also reject floats with a fractional part assigned to integers.
    #[default]
    Fractional,
    /// Also reject any loss of floating point precision.
    Inexact,
}

impl fmt::Display for ErrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorMode::None => "none",
            ErrorMode::Overflow => "overflow",
            ErrorMode::Fractional => "fractional",
            ErrorMode::Inexact => "inexact",
        })
    }
}

impl FromStr for ErrorMode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ErrorMode::None),
            "overflow" => Ok(ErrorMode::Overflow),
            "fractional" => Ok(ErrorMode::Fractional),
            "inexact" => Ok(ErrorMode::Inexact),
            _ => Err(Error::Unsupported(format!("unknown error mode `{s}`"))),
        }
    }
}

/// Places the frames assigning `src` values to `dst` and returns the root offset.
pub fn make_assignment_kernel(
    ckb: &mut KernelBuilder,
    dst: &DType,
    dst_meta: &[MetaSlot],
    src: &DType,
    src_meta: &[MetaSlot],
    kernreq: KernelRequest,
    errmode: ErrorMode,
) -> Result<usize> {
    if dst.is_symbolic() || src.is_symbolic() {
        return Err(Error::Unsupported(format!(
            "cannot assign between symbolic types {src} and {dst}"
        )));
    }
    if dst == src && dst.is_pod() {
        return Ok(copy::make_byte_copy(ckb, dst.data_size(), kernreq));
    }
    if src.is_expression() {
        return expr::make_expr_to_value(ckb, dst, dst_meta, src, src_meta, kernreq, errmode);
    }
    if dst.is_expression() {
        return expr::make_value_to_expr(ckb, dst, dst_meta, src, src_meta, kernreq, errmode);
    }
    if let (DType::Builtin(d), DType::Builtin(s)) = (dst, src) {
        let mode = if builtin_lossless(*d, *s) {
            ErrorMode::None
        } else {
            errmode
        };
        return make_builtin_assignment(ckb, *d, *s, kernreq, mode);
    }
    for tp in [dst, src] {
        if let Some(ext) = tp.extended() {
            if let Some(root) =
                ext.make_assignment_kernel(ckb, dst, dst_meta, src, src_meta, kernreq, errmode)?
            {
                return Ok(root);
            }
        }
    }
    if let Some(conv) = kind_converters().get(dst.kind(), src.kind()) {
        debug!(%dst, %src, "assignment through kind converter");
        return conv(ckb, dst, dst_meta, src, src_meta, kernreq, errmode);
    }
    Err(Error::NoConversion {
        dst: dst.clone(),
        src: src.clone(),
    })
}

/// Builds and finalises a standalone assignment kernel.
pub fn assignment_kernel(
    dst: &DType,
    dst_meta: &[MetaSlot],
    src: &DType,
    src_meta: &[MetaSlot],
    kernreq: KernelRequest,
    errmode: ErrorMode,
) -> Result<Kernel> {
    let mut ckb = KernelBuilder::new();
    make_assignment_kernel(&mut ckb, dst, dst_meta, src, src_meta, kernreq, errmode)?;
    ckb.finalize()
}

/// Assigns one element.
///
/// # Safety
///
/// `dst` and `src` must point to valid, aligned elements of their types described by the arrmeta.
pub unsafe fn assign_single(
    dst_tp: &DType,
    dst_meta: &[MetaSlot],
    dst: *mut u8,
    src_tp: &DType,
    src_meta: &[MetaSlot],
    src: *const u8,
    errmode: ErrorMode,
) -> Result<()> {
    let mut kernel = assignment_kernel(
        dst_tp,
        dst_meta,
        src_tp,
        src_meta,
        KernelRequest::Single,
        errmode,
    )?;
    // SAFETY: forwarded from the caller.
    unsafe { kernel.single(dst, &[src]) }
}

/// Whether every value of `src` survives assignment to `dst` unchanged.
pub fn is_lossless_assignment(dst: &DType, src: &DType) -> bool {
    if dst == src {
        return true;
    }
    if src.is_expression() {
        return is_lossless_assignment(dst, src.value_type());
    }
    if dst.is_expression() {
        return is_lossless_assignment(dst.value_type(), src);
    }
    if let (DType::Builtin(d), DType::Builtin(s)) = (dst, src) {
        return builtin_lossless(*d, *s);
    }
    [dst, src]
        .iter()
        .filter_map(|tp| tp.extended())
        .any(|ext| ext.is_lossless_assignment(dst, src))
}
