//! Callable concept: a named operation that resolves operand types and builds kernels.
//!
//! A callable is used in two steps. [`BaseCallable::resolve`] takes the operand dtypes and
//! returns the destination dtype; [`BaseCallable::instantiate`] then places the frames computing
//! that destination from operands of exactly those types into a [`KernelBuilder`]. The type
//! returned by `resolve` is the type the instantiated kernel writes.

use core::any::Any;
use core::fmt;
use std::sync::Arc;

use ndkern_core::arrmeta::MetaSlot;
use ndkern_core::kernel::{Kernel, KernelBuilder, KernelRequest};
use ndkern_core::types::{DType, FuncProto};
use ndkern_core::{Error, Result};
use tracing::debug;

use crate::multidispatch::Multidispatch;

/// Bit set of callable properties.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CallableFlags(u32);

impl CallableFlags {
    pub const NONE: CallableFlags = CallableFlags(0);
    /// Declares a signature only; it can be resolved but never instantiated.
    pub const ABSTRACT: CallableFlags = CallableFlags(1);
    /// Dispatches to one of several overloads.
    pub const DISPATCH: CallableFlags = CallableFlags(1 << 1);

    pub const fn contains(self, other: CallableFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for CallableFlags {
    type Output = CallableFlags;
    fn bitor(self, rhs: CallableFlags) -> CallableFlags {
        CallableFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for CallableFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::ABSTRACT) {
            names.push("ABSTRACT");
        }
        if self.contains(Self::DISPATCH) {
            names.push("DISPATCH");
        }
        write!(f, "CallableFlags({})", names.join(" | "))
    }
}

/// Interface of every callable.
///
/// Implementors are immutable and shared between threads through [`Callable`].
pub trait BaseCallable: Any + Send + Sync + fmt::Debug {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Declared prototype, possibly symbolic.
    fn proto(&self) -> &FuncProto;

    fn flags(&self) -> CallableFlags {
        CallableFlags::NONE
    }

    /// Destination type for operands of types `src`.
    fn resolve(&self, src: &[DType]) -> Result<DType> {
        check_arity(self.name(), self.proto(), src)?;
        Ok(self.proto().resolve(src)?.0)
    }

    /// Places the frames computing `dst` from operands of types `src` and returns the root
    /// offset. `dst` must be the type `resolve(src)` returned.
    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        dst: &DType,
        dst_meta: &[MetaSlot],
        src: &[DType],
        src_meta: &[&[MetaSlot]],
        kernreq: KernelRequest,
    ) -> Result<usize>;
}

/// Shared handle on a callable.
pub type Callable = Arc<dyn BaseCallable>;

/// Fails with [`Error::ArgumentCount`] unless `src` has as many operands as `proto` declares.
pub fn check_arity(name: &str, proto: &FuncProto, src: &[DType]) -> Result<()> {
    if src.len() != proto.nargs() {
        return Err(Error::ArgumentCount {
            name: name.to_string(),
            expected: proto.nargs(),
            found: src.len(),
        });
    }
    Ok(())
}

/// Concrete callable type behind a handle.
pub fn downcast<T: BaseCallable>(callable: &Callable) -> Option<&T> {
    let any: &dyn Any = &**callable;
    any.downcast_ref::<T>()
}

/// Resolves `src` and builds a finalised kernel with default arrmeta on every operand.
///
/// Returns the destination type along with the kernel.
pub fn build_kernel(
    callable: &dyn BaseCallable,
    src: &[DType],
    kernreq: KernelRequest,
) -> Result<(DType, Kernel)> {
    let dst = callable.resolve(src)?;
    let dst_meta = dst.arrmeta_default()?;
    let src_meta = src
        .iter()
        .map(DType::arrmeta_default)
        .collect::<Result<Vec<_>>>()?;
    let src_meta_refs: Vec<&[MetaSlot]> = src_meta.iter().map(Vec::as_slice).collect();
    let mut ckb = KernelBuilder::new();
    callable.instantiate(&mut ckb, &dst, &dst_meta, src, &src_meta_refs, kernreq)?;
    let kernel = ckb.finalize()?;
    debug!(callable = callable.name(), %dst, frames = kernel.len(), "kernel built");
    Ok((dst, kernel))
}

/// The overload of `callable` that handles operands of types `src`.
///
/// Dispatching callables return the overload they select; other concrete callables return
/// themselves once `src` resolves. Abstract callables have no overloads.
pub fn overload(callable: &Callable, src: &[DType]) -> Result<Callable> {
    if callable.flags().contains(CallableFlags::ABSTRACT) {
        return Err(Error::Unsupported(format!(
            "abstract callable `{}` has no overloads",
            callable.name()
        )));
    }
    if let Some(dispatch) = downcast::<Multidispatch>(callable) {
        return dispatch.overload(src);
    }
    callable.resolve(src)?;
    Ok(callable.clone())
}

/// A declared signature without an implementation.
///
/// Overloads are attached with [`Multidispatch::with_overloads`], which yields a new callable.
#[derive(Debug)]
pub struct Abstract {
    name: String,
    proto: FuncProto,
}

impl Abstract {
    pub fn new(name: impl Into<String>, proto: FuncProto) -> Self {
        Self {
            name: name.into(),
            proto,
        }
    }

    pub fn make(name: impl Into<String>, proto: FuncProto) -> Callable {
        Arc::new(Self::new(name, proto))
    }
}

impl BaseCallable for Abstract {
    fn name(&self) -> &str {
        &self.name
    }

    fn proto(&self) -> &FuncProto {
        &self.proto
    }

    fn flags(&self) -> CallableFlags {
        CallableFlags::ABSTRACT
    }

    fn instantiate(
        &self,
        _ckb: &mut KernelBuilder,
        _dst: &DType,
        _dst_meta: &[MetaSlot],
        _src: &[DType],
        _src_meta: &[&[MetaSlot]],
        _kernreq: KernelRequest,
    ) -> Result<usize> {
        Err(Error::Unsupported(format!(
            "abstract callable `{}` cannot be instantiated",
            self.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply;

    #[test]
    fn abstract_resolves_but_refuses_kernels() -> anyhow::Result<()> {
        let f = Abstract::make("f", FuncProto::parse("(T, T) -> T")?);
        assert!(f.flags().contains(CallableFlags::ABSTRACT));
        assert_eq!(f.resolve(&[DType::INT8, DType::INT8])?, DType::INT8);
        assert!(matches!(
            f.resolve(&[DType::INT8]),
            Err(Error::ArgumentCount {
                expected: 2,
                found: 1,
                ..
            })
        ));
        assert!(matches!(
            build_kernel(&*f, &[DType::INT8, DType::INT8], KernelRequest::Single),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(overload(&f, &[DType::INT8, DType::INT8]), Err(Error::Unsupported(_))));
        Ok(())
    }

    #[test]
    fn concrete_callable_is_its_own_overload() -> anyhow::Result<()> {
        let f = apply::binary("hypot", |a: f64, b: f64| a.hypot(b));
        let o = overload(&f, &[DType::FLOAT64, DType::FLOAT64])?;
        assert!(Arc::ptr_eq(&o, &f));
        assert!(overload(&f, &[DType::FLOAT32, DType::FLOAT64]).is_err());

        let (dst, mut kernel) = build_kernel(&*f, &[DType::FLOAT64, DType::FLOAT64], KernelRequest::Single)?;
        assert_eq!(dst, DType::FLOAT64);
        let (a, b, mut out) = (3.0f64, 4.0f64, 0.0f64);
        unsafe {
            kernel.single(
                (&mut out as *mut f64).cast(),
                &[(&a as *const f64).cast(), (&b as *const f64).cast()],
            )?
        };
        assert_eq!(out, 5.0);
        Ok(())
    }

    #[test]
    fn flags_debug() {
        assert_eq!(
            format!("{:?}", CallableFlags::ABSTRACT | CallableFlags::DISPATCH),
            "CallableFlags(ABSTRACT | DISPATCH)"
        );
    }
}
