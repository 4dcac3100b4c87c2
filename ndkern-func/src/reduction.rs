//! Reduction callables `max`, `min` and `sum`.
//!
//! A reduction is a `(T) -> T` accumulating callable: its kernel folds each source element into
//! the destination element it maps to. The caller seeds every destination element with the first
//! source element reduced into it and skips those elements, so no identity value is needed.

use std::sync::{Arc, OnceLock};

use ndkern_core::Result;
use ndkern_core::types::{BuiltinScalar, Complex32, Complex64, Float16, FuncProto};

use crate::apply;
use crate::arithmetic::Arith;
use crate::callable::Callable;
use crate::multidispatch::Multidispatch;

/// The supported reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Max,
    Min,
    Sum,
}

impl ReduceOp {
    pub fn name(self) -> &'static str {
        match self {
            ReduceOp::Max => "max",
            ReduceOp::Min => "min",
            ReduceOp::Sum => "sum",
        }
    }
}

/// Larger of two values; NaN wins so that it propagates through a reduction.
#[allow(clippy::eq_op)]
fn nan_max<T: PartialOrd + Copy>(a: T, b: T) -> T {
    if a != a {
        a
    } else if b != b || b > a {
        b
    } else {
        a
    }
}

#[allow(clippy::eq_op)]
fn nan_min<T: PartialOrd + Copy>(a: T, b: T) -> T {
    if a != a {
        a
    } else if b != b || b < a {
        b
    } else {
        a
    }
}

fn extremum<T: BuiltinScalar + PartialOrd>(op: ReduceOp) -> Callable {
    match op {
        ReduceOp::Min => apply::accumulate(op.name(), nan_min::<T>),
        _ => apply::accumulate(op.name(), nan_max::<T>),
    }
}

fn total<T: Arith>() -> Callable {
    apply::accumulate(ReduceOp::Sum.name(), T::add)
}

fn build(op: ReduceOp) -> Result<Callable> {
    let overloads = match op {
        ReduceOp::Max | ReduceOp::Min => vec![
            extremum::<bool>(op),
            extremum::<i8>(op),
            extremum::<i16>(op),
            extremum::<i32>(op),
            extremum::<i64>(op),
            extremum::<u8>(op),
            extremum::<u16>(op),
            extremum::<u32>(op),
            extremum::<u64>(op),
            extremum::<Float16>(op),
            extremum::<f32>(op),
            extremum::<f64>(op),
        ],
        ReduceOp::Sum => vec![
            total::<i8>(),
            total::<i16>(),
            total::<i32>(),
            total::<i64>(),
            total::<u8>(),
            total::<u16>(),
            total::<u32>(),
            total::<u64>(),
            total::<Float16>(),
            total::<f32>(),
            total::<f64>(),
            total::<Complex32>(),
            total::<Complex64>(),
        ],
    };
    Multidispatch::make(op.name(), FuncProto::parse("(T) -> T")?, overloads)
}

/// The reduction callable for `op`.
pub fn reduction(op: ReduceOp) -> Result<Callable> {
    static TABLES: [OnceLock<Callable>; 3] = [const { OnceLock::new() }; 3];
    let cell = &TABLES[op as usize];
    if let Some(f) = cell.get() {
        return Ok(f.clone());
    }
    let f = build(op)?;
    Ok(Arc::clone(cell.get_or_init(|| f)))
}

pub fn max() -> Result<Callable> {
    reduction(ReduceOp::Max)
}

pub fn min() -> Result<Callable> {
    reduction(ReduceOp::Min)
}

pub fn sum() -> Result<Callable> {
    reduction(ReduceOp::Sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::build_kernel;
    use ndkern_core::kernel::KernelRequest;
    use ndkern_core::types::DType;

    fn fold<T: BuiltinScalar>(f: &Callable, seed: T, values: &[T]) -> anyhow::Result<T> {
        let (dst, mut k) = build_kernel(&**f, &[DType::of::<T>()], KernelRequest::Strided)?;
        assert_eq!(dst, DType::of::<T>());
        let mut acc = seed;
        let stride = core::mem::size_of::<T>() as isize;
        unsafe { k.strided((&mut acc as *mut T).cast(), 0, &[values.as_ptr().cast()], &[stride], values.len())? };
        Ok(acc)
    }

    #[test]
    fn extremes_and_totals() -> anyhow::Result<()> {
        assert_eq!(fold(&max()?, 3i32, &[-1, 7, 2])?, 7);
        assert_eq!(fold(&min()?, 3u8, &[9, 1, 4])?, 1);
        assert_eq!(fold(&sum()?, 0.5f64, &[1.0, 2.0])?, 3.5);
        assert_eq!(fold(&sum()?, Complex64::new(1.0, 1.0), &[Complex64::new(0.0, 2.0)])?, Complex64::new(1.0, 3.0));
        assert!(fold(&max()?, 1.0f32, &[f32::NAN, 5.0])?.is_nan());
        assert!(fold(&max()?, true, &[false])?);
        Ok(())
    }

    #[test]
    fn unsupported_types_are_unresolved() -> anyhow::Result<()> {
        assert!(max()?.resolve(&[DType::COMPLEX64]).is_err());
        assert!(sum()?.resolve(&[DType::BOOL]).is_err());
        assert_eq!(sum()?.resolve(&[DType::UINT16])?, DType::UINT16);
        Ok(())
    }
}
