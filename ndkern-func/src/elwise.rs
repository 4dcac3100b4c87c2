//! Elementwise lifting of scalar callables over leading fixed dimensions.
//!
//! Operands are broadcast against each other right-aligned, the way array shapes broadcast.
//! Each lifted dimension becomes one [`DimLoopFrame`] whose source strides are zero for
//! operands that are broadcast along it.

use core::fmt;
use std::sync::Arc;

use itertools::Itertools;
use ndkern_core::arrmeta::MetaSlot;
use ndkern_core::kernel::{DimLoopFrame, KernelBuilder, KernelRequest};
use ndkern_core::shape::broadcast_shapes;
use ndkern_core::types::{DType, EllipsisDim, FixedDim, FuncProto};
use ndkern_core::{Error, Result};
use tracing::trace;

use crate::callable::{BaseCallable, Callable, check_arity};

/// Number of dimensions the lift loops over for operands `src`.
pub fn lifted_ndim(src: &[DType]) -> usize {
    src.iter().map(DType::ndim).max().unwrap_or(0)
}

/// Destination type of `child` lifted over the leading dimensions of `src`.
pub fn resolve_lifted(child: &dyn BaseCallable, src: &[DType]) -> Result<DType> {
    check_arity(child.name(), child.proto(), src)?;
    if lifted_ndim(src) == 0 {
        return child.resolve(src);
    }
    let shapes = src.iter().map(DType::shape).collect_vec();
    let shape = broadcast_shapes(&shapes)?;
    let elements = src.iter().map(|tp| tp.dtype().clone()).collect_vec();
    let element = child.resolve(&elements)?;
    Ok(FixedDim::make_nd(&shape, element))
}

fn dim_of(tp: &DType, meta: &[MetaSlot]) -> Result<(usize, isize)> {
    meta.first()
        .and_then(MetaSlot::dim)
        .ok_or_else(|| Error::Shape(format!("arrmeta of {tp} lacks its dimension slot")))
}

/// Places one loop frame per lifted dimension followed by the kernel of `child`.
pub fn instantiate_lifted(
    child: &dyn BaseCallable,
    ckb: &mut KernelBuilder,
    dst: &DType,
    dst_meta: &[MetaSlot],
    src: &[DType],
    src_meta: &[&[MetaSlot]],
    kernreq: KernelRequest,
) -> Result<usize> {
    let ndim = lifted_ndim(src);
    if ndim == 0 {
        return child.instantiate(ckb, dst, dst_meta, src, src_meta, kernreq);
    }
    let (size, dst_stride) = dim_of(dst, dst_meta)?;
    let dst_el = dst
        .element_type()
        .ok_or_else(|| Error::Shape(format!("{dst} has fewer dimensions than its operands")))?;

    let mut src_stride = Vec::with_capacity(src.len());
    let mut src_el = Vec::with_capacity(src.len());
    let mut src_el_meta = Vec::with_capacity(src.len());
    for (tp, &meta) in src.iter().zip(src_meta) {
        if tp.ndim() < ndim {
            src_stride.push(0);
            src_el.push(tp.clone());
            src_el_meta.push(meta);
            continue;
        }
        let (n, stride) = dim_of(tp, meta)?;
        src_stride.push(match n {
            n if n == size => stride,
            1 => 0,
            _ => {
                return Err(Error::Broadcast {
                    lhs: dst.shape(),
                    rhs: tp.shape(),
                });
            }
        });
        // the dimension slot is followed by the element's slots
        src_el.push(tp.element_type().cloned().unwrap_or_else(|| tp.clone()));
        src_el_meta.push(&meta[1..]);
    }
    trace!(size, dst_stride, ?src_stride, "lifting over a dimension");

    let root = ckb.emplace(
        DimLoopFrame {
            size,
            dst_stride,
            src_stride,
        },
        kernreq,
    );
    instantiate_lifted(
        child,
        ckb,
        dst_el,
        &dst_meta[1..],
        &src_el,
        &src_el_meta,
        KernelRequest::Strided,
    )?;
    Ok(root)
}

/// A scalar callable lifted over any number of leading dimensions.
pub struct Elwise {
    name: String,
    proto: FuncProto,
    child: Callable,
}

impl Elwise {
    pub fn new(child: Callable) -> Self {
        let lift = |tp: &DType| EllipsisDim::make(None, tp.clone());
        let proto = FuncProto::new(
            child.proto().args().iter().map(lift).collect(),
            lift(child.proto().ret()),
        );
        Self {
            name: child.name().to_string(),
            proto,
            child,
        }
    }

    pub fn make(child: Callable) -> Callable {
        Arc::new(Self::new(child))
    }

    pub fn child(&self) -> &Callable {
        &self.child
    }
}

impl fmt::Debug for Elwise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Elwise({:?})", self.child)
    }
}

impl BaseCallable for Elwise {
    fn name(&self) -> &str {
        &self.name
    }

    fn proto(&self) -> &FuncProto {
        &self.proto
    }

    fn resolve(&self, src: &[DType]) -> Result<DType> {
        resolve_lifted(&*self.child, src)
    }

    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        dst: &DType,
        dst_meta: &[MetaSlot],
        src: &[DType],
        src_meta: &[&[MetaSlot]],
        kernreq: KernelRequest,
    ) -> Result<usize> {
        instantiate_lifted(&*self.child, ckb, dst, dst_meta, src, src_meta, kernreq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply;
    use crate::callable::build_kernel;

    #[test]
    fn lifts_with_broadcasting() -> anyhow::Result<()> {
        let add = Elwise::make(apply::binary("add", |a: i32, b: i32| a + b));
        assert_eq!(add.proto().to_string(), "(... * int32, ... * int32) -> ... * int32");

        let a_tp = DType::parse("2 * 3 * int32")?;
        let b_tp = DType::parse("3 * int32")?;
        let (dst, mut k) = build_kernel(&*add, &[a_tp, b_tp], KernelRequest::Single)?;
        assert_eq!(dst.to_string(), "2 * 3 * int32");
        assert_eq!(k.frame_names(), vec!["DimLoopFrame", "DimLoopFrame", "BinaryFrame"]);

        let a = [1i32, 2, 3, 4, 5, 6];
        let b = [10i32, 20, 30];
        let mut out = [0i32; 6];
        unsafe { k.single(out.as_mut_ptr().cast(), &[a.as_ptr().cast(), b.as_ptr().cast()])? };
        assert_eq!(out, [11, 22, 33, 14, 25, 36]);
        Ok(())
    }

    #[test]
    fn scalars_pass_straight_through() -> anyhow::Result<()> {
        let mul = Elwise::make(apply::binary("mul", |a: f32, b: f32| a * b));
        let (dst, k) = build_kernel(&*mul, &[DType::FLOAT32, DType::FLOAT32], KernelRequest::Single)?;
        assert_eq!(dst, DType::FLOAT32);
        assert_eq!(k.len(), 1);
        Ok(())
    }

    #[test]
    fn size_one_dimensions_broadcast() -> anyhow::Result<()> {
        let add = Elwise::make(apply::binary("add", |a: i64, b: i64| a + b));
        let a_tp = DType::parse("3 * 1 * int64")?;
        let b_tp = DType::parse("1 * 2 * int64")?;
        let (dst, mut k) = build_kernel(&*add, &[a_tp, b_tp], KernelRequest::Single)?;
        assert_eq!(dst.shape(), vec![3, 2]);
        let a = [100i64, 200, 300];
        let b = [1i64, 2];
        let mut out = [0i64; 6];
        unsafe { k.single(out.as_mut_ptr().cast(), &[a.as_ptr().cast(), b.as_ptr().cast()])? };
        assert_eq!(out, [101, 102, 201, 202, 301, 302]);
        Ok(())
    }

    #[test]
    fn incompatible_dimensions_fail() -> anyhow::Result<()> {
        let add = Elwise::make(apply::binary("add", |a: i8, b: i8| a.wrapping_add(b)));
        let err = add.resolve(&[DType::parse("3 * int8")?, DType::parse("4 * int8")?]);
        assert!(matches!(err, Err(Error::Broadcast { .. })));
        Ok(())
    }
}
