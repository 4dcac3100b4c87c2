//! Callables built from plain Rust functions over builtin scalars.
//!
//! The prototype is derived from the Rust types: `binary("hypot", |a: f64, b: f64| a.hypot(b))`
//! is the callable `(float64, float64) -> float64`.

use core::fmt;
use core::marker::PhantomData;
use core::ptr;
use std::sync::Arc;

use ndkern_core::arrmeta::MetaSlot;
use ndkern_core::kernel::{Children, KernelBuilder, KernelFrame, KernelRequest};
use ndkern_core::types::{BuiltinScalar, DType, FuncProto, TypeId};
use ndkern_core::{Error, Result, with_builtin_type};

use crate::callable::{BaseCallable, Callable, check_arity};

/// Generic action over one builtin scalar type, see [`visit_builtin`].
pub trait ScalarVisitor {
    type Output;
    fn visit<T: BuiltinScalar>(&self) -> Self::Output;
}

/// Generic action over a pair of builtin scalar types, see [`visit_builtin_pair`].
pub trait PairVisitor {
    type Output;
    fn visit<A: BuiltinScalar, B: BuiltinScalar>(&self) -> Self::Output;
}

/// Runs `v` with the Rust scalar of `id`; `None` for non-builtin tags.
pub fn visit_builtin<V: ScalarVisitor>(id: TypeId, v: &V) -> Option<V::Output> {
    with_builtin_type!(id, T => Some(v.visit::<T>()), _ => None)
}

/// Runs `v` with the Rust scalars of `a` and `b`; `None` unless both are builtin tags.
pub fn visit_builtin_pair<V: PairVisitor>(a: TypeId, b: TypeId, v: &V) -> Option<V::Output> {
    with_builtin_type!(
        a,
        A => with_builtin_type!(b, B => Some(v.visit::<A, B>()), _ => None),
        _ => None
    )
}

fn check_types(name: &str, proto: &FuncProto, dst: &DType, src: &[DType]) -> Result<()> {
    check_arity(name, proto, src)?;
    if dst != proto.ret() || src != proto.args() {
        return Err(Error::SignatureMismatch {
            proto: proto.to_string(),
            operands: src.to_vec(),
        });
    }
    Ok(())
}

/// `(A, B) -> R` callable from a fallible function.
pub struct TryBinary<A, B, R, F> {
    name: String,
    proto: FuncProto,
    f: F,
    _marker: PhantomData<fn(A, B) -> R>,
}

impl<A, B, R, F> fmt::Debug for TryBinary<A, B, R, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TryBinary({}: {})", self.name, self.proto)
    }
}

impl<A, B, R, F> BaseCallable for TryBinary<A, B, R, F>
where
    A: BuiltinScalar,
    B: BuiltinScalar,
    R: BuiltinScalar,
    F: Fn(A, B) -> Result<R> + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn proto(&self) -> &FuncProto {
        &self.proto
    }

    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        dst: &DType,
        _dst_meta: &[MetaSlot],
        src: &[DType],
        _src_meta: &[&[MetaSlot]],
        kernreq: KernelRequest,
    ) -> Result<usize> {
        check_types(&self.name, &self.proto, dst, src)?;
        Ok(ckb.emplace(
            BinaryFrame {
                f: self.f.clone(),
                _marker: PhantomData::<fn(A, B) -> R>,
            },
            kernreq,
        ))
    }
}

struct BinaryFrame<A, B, R, F> {
    f: F,
    _marker: PhantomData<fn(A, B) -> R>,
}

impl<A, B, R, F> KernelFrame for BinaryFrame<A, B, R, F>
where
    A: BuiltinScalar,
    B: BuiltinScalar,
    R: BuiltinScalar,
    F: Fn(A, B) -> Result<R> + Send + 'static,
{
    unsafe fn single(&mut self, _: Children<'_>, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        // SAFETY: the caller passes aligned `R`, `A` and `B` elements.
        unsafe {
            let a = ptr::read(src[0].cast::<A>());
            let b = ptr::read(src[1].cast::<B>());
            ptr::write(dst.cast::<R>(), (self.f)(a, b)?);
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
        let (mut d, mut a, mut b) = (dst, src[0], src[1]);
        for _ in 0..count {
            // SAFETY: as in `single`, for each of the `count` elements.
            unsafe {
                let r = (self.f)(ptr::read(a.cast::<A>()), ptr::read(b.cast::<B>()))?;
                ptr::write(d.cast::<R>(), r);
            }
            d = d.wrapping_offset(dst_stride);
            a = a.wrapping_offset(src_stride[0]);
            b = b.wrapping_offset(src_stride[1]);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "BinaryFrame"
    }
}

/// `(A, B) -> R` callable from a function that may fail.
pub fn try_binary<A, B, R, F>(name: impl Into<String>, f: F) -> Callable
where
    A: BuiltinScalar,
    B: BuiltinScalar,
    R: BuiltinScalar,
    F: Fn(A, B) -> Result<R> + Clone + Send + Sync + 'static,
{
    Arc::new(TryBinary {
        name: name.into(),
        proto: FuncProto::new(vec![DType::of::<A>(), DType::of::<B>()], DType::of::<R>()),
        f,
        _marker: PhantomData,
    })
}

/// `(A, B) -> R` callable from an infallible function.
pub fn binary<A, B, R, F>(name: impl Into<String>, f: F) -> Callable
where
    A: BuiltinScalar,
    B: BuiltinScalar,
    R: BuiltinScalar,
    F: Fn(A, B) -> R + Clone + Send + Sync + 'static,
{
    try_binary(name, move |a: A, b: B| Ok(f(a, b)))
}

/// `(A) -> R` callable.
pub struct Unary<A, R, F> {
    name: String,
    proto: FuncProto,
    f: F,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R, F> fmt::Debug for Unary<A, R, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unary({}: {})", self.name, self.proto)
    }
}

impl<A, R, F> BaseCallable for Unary<A, R, F>
where
    A: BuiltinScalar,
    R: BuiltinScalar,
    F: Fn(A) -> Result<R> + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn proto(&self) -> &FuncProto {
        &self.proto
    }

    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        dst: &DType,
        _dst_meta: &[MetaSlot],
        src: &[DType],
        _src_meta: &[&[MetaSlot]],
        kernreq: KernelRequest,
    ) -> Result<usize> {
        check_types(&self.name, &self.proto, dst, src)?;
        Ok(ckb.emplace(
            UnaryFrame {
                f: self.f.clone(),
                _marker: PhantomData::<fn(A) -> R>,
            },
            kernreq,
        ))
    }
}

struct UnaryFrame<A, R, F> {
    f: F,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R, F> KernelFrame for UnaryFrame<A, R, F>
where
    A: BuiltinScalar,
    R: BuiltinScalar,
    F: Fn(A) -> Result<R> + Send + 'static,
{
    unsafe fn single(&mut self, _: Children<'_>, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        // SAFETY: the caller passes aligned `R` and `A` elements.
        unsafe { ptr::write(dst.cast::<R>(), (self.f)(ptr::read(src[0].cast::<A>()))?) };
        Ok(())
    }

    fn name(&self) -> &'static str {
        "UnaryFrame"
    }
}

/// `(A) -> R` callable from a function that may fail.
pub fn try_unary<A, R, F>(name: impl Into<String>, f: F) -> Callable
where
    A: BuiltinScalar,
    R: BuiltinScalar,
    F: Fn(A) -> Result<R> + Clone + Send + Sync + 'static,
{
    Arc::new(Unary {
        name: name.into(),
        proto: FuncProto::new(vec![DType::of::<A>()], DType::of::<R>()),
        f,
        _marker: PhantomData,
    })
}

/// `(A) -> R` callable from an infallible function.
pub fn unary<A, R, F>(name: impl Into<String>, f: F) -> Callable
where
    A: BuiltinScalar,
    R: BuiltinScalar,
    F: Fn(A) -> R + Clone + Send + Sync + 'static,
{
    try_unary(name, move |a: A| Ok(f(a)))
}

/// `(T) -> T` callable folding each operand into the destination: `dst = f(dst, src)`.
///
/// The destination must hold a valid value before the kernel runs; reductions seed it with
/// the first element of each reduced run.
pub struct Accumulate<T, F> {
    name: String,
    proto: FuncProto,
    f: F,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, F> fmt::Debug for Accumulate<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Accumulate({}: {})", self.name, self.proto)
    }
}

impl<T, F> BaseCallable for Accumulate<T, F>
where
    T: BuiltinScalar,
    F: Fn(T, T) -> T + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn proto(&self) -> &FuncProto {
        &self.proto
    }

    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        dst: &DType,
        _dst_meta: &[MetaSlot],
        src: &[DType],
        _src_meta: &[&[MetaSlot]],
        kernreq: KernelRequest,
    ) -> Result<usize> {
        check_types(&self.name, &self.proto, dst, src)?;
        Ok(ckb.emplace(
            AccumulateFrame {
                f: self.f.clone(),
                _marker: PhantomData::<fn(T) -> T>,
            },
            kernreq,
        ))
    }
}

struct AccumulateFrame<T, F> {
    f: F,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, F> KernelFrame for AccumulateFrame<T, F>
where
    T: BuiltinScalar,
    F: Fn(T, T) -> T + Send + 'static,
{
    unsafe fn single(&mut self, _: Children<'_>, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        // SAFETY: the caller passes aligned `T` elements; `dst` already holds a value.
        unsafe {
            let acc = ptr::read(dst.cast::<T>());
            ptr::write(dst.cast::<T>(), (self.f)(acc, ptr::read(src[0].cast::<T>())));
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
        if dst_stride == 0 && count > 0 {
            // SAFETY: as in `single`; every element folds into the same destination.
            unsafe {
                let mut acc = ptr::read(d.cast::<T>());
                for _ in 0..count {
                    acc = (self.f)(acc, ptr::read(s.cast::<T>()));
                    s = s.wrapping_offset(src_stride[0]);
                }
                ptr::write(d.cast::<T>(), acc);
            }
            return Ok(());
        }
        for _ in 0..count {
            // SAFETY: as in `single`, for each of the `count` elements.
            unsafe {
                let acc = ptr::read(d.cast::<T>());
                ptr::write(d.cast::<T>(), (self.f)(acc, ptr::read(s.cast::<T>())));
            }
            d = d.wrapping_offset(dst_stride);
            s = s.wrapping_offset(src_stride[0]);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "AccumulateFrame"
    }
}

/// `(T) -> T` accumulating callable, see [`Accumulate`].
pub fn accumulate<T, F>(name: impl Into<String>, f: F) -> Callable
where
    T: BuiltinScalar,
    F: Fn(T, T) -> T + Clone + Send + Sync + 'static,
{
    Arc::new(Accumulate {
        name: name.into(),
        proto: FuncProto::new(vec![DType::of::<T>()], DType::of::<T>()),
        f,
        _marker: PhantomData,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::build_kernel;

    #[test]
    fn binary_prototype_follows_rust_types() -> anyhow::Result<()> {
        let f = binary("scale", |a: i16, b: f32| a as f64 * b as f64);
        assert_eq!(f.proto().to_string(), "(int16, float32) -> float64");
        let (dst, mut k) = build_kernel(&*f, &[DType::INT16, DType::FLOAT32], KernelRequest::Strided)?;
        assert_eq!(dst, DType::FLOAT64);
        let a = [1i16, 2, 3];
        let b = [0.5f32];
        let mut out = [0f64; 3];
        unsafe { k.strided(out.as_mut_ptr().cast(), 8, &[a.as_ptr().cast(), b.as_ptr().cast()], &[2, 0], 3)? };
        assert_eq!(out, [0.5, 1.0, 1.5]);
        Ok(())
    }

    #[test]
    fn failing_function_stops_the_run() -> anyhow::Result<()> {
        let f = try_unary("recip", |a: i32| {
            if a == 0 {
                Err(Error::Arithmetic("reciprocal of zero".into()))
            } else {
                Ok(1.0 / a as f64)
            }
        });
        let (_, mut k) = build_kernel(&*f, &[DType::INT32], KernelRequest::Strided)?;
        let a = [1i32, 4, 0, 2];
        let mut out = [9f64; 4];
        let err = unsafe { k.strided(out.as_mut_ptr().cast(), 8, &[a.as_ptr().cast()], &[4], 4) };
        assert!(matches!(err, Err(Error::Arithmetic(_))));
        assert_eq!(out, [1.0, 0.25, 9.0, 9.0]);
        Ok(())
    }

    #[test]
    fn accumulate_folds_into_destination() -> anyhow::Result<()> {
        let f = accumulate("sum", |a: i64, b: i64| a + b);
        let (_, mut k) = build_kernel(&*f, &[DType::INT64], KernelRequest::Strided)?;
        let src = [1i64, 2, 3, 4];
        let mut acc = 10i64;
        unsafe { k.strided((&mut acc as *mut i64).cast(), 0, &[src.as_ptr().cast()], &[8], 4)? };
        assert_eq!(acc, 20);
        Ok(())
    }

    #[test]
    fn mismatched_instantiation_is_rejected() {
        let f = unary("neg", |a: i8| a.wrapping_neg());
        let mut ckb = KernelBuilder::new();
        let err = f.instantiate(&mut ckb, &DType::INT8, &[], &[DType::INT16], &[&[]], KernelRequest::Single);
        assert!(matches!(err, Err(Error::SignatureMismatch { .. })));
    }

    struct SizeOfPair;

    impl PairVisitor for SizeOfPair {
        type Output = usize;
        fn visit<A: BuiltinScalar, B: BuiltinScalar>(&self) -> usize {
            core::mem::size_of::<A>() + core::mem::size_of::<B>()
        }
    }

    #[test]
    fn visitors_see_rust_scalars() {
        assert_eq!(visit_builtin_pair(TypeId::Int8, TypeId::Complex128, &SizeOfPair), Some(17));
        assert_eq!(visit_builtin_pair(TypeId::Int8, TypeId::Struct, &SizeOfPair), None);
    }
}
