//! Arithmetic callables: `add`, `subtract`, `multiply`, `divide`.
//!
//! Each is a dispatch over `(T, T) -> T` for every numeric builtin except `bool`. Mixed operands
//! resolve through the promoted common type. Integers wrap on overflow; integer division by
//! zero is an [`Error::Arithmetic`].

use core::fmt;
use std::sync::OnceLock;

use ndkern_core::types::{BuiltinScalar, Complex32, Complex64, Float16, FuncProto};
use ndkern_core::{Error, Result};
use num_traits::{WrappingAdd, WrappingMul, WrappingSub};

use crate::apply;
use crate::callable::Callable;
use crate::multidispatch::Multidispatch;

/// Scalars with the four arithmetic operations.
pub(crate) trait Arith: BuiltinScalar {
    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    fn div(self, rhs: Self) -> Result<Self>;
}

macro_rules! impl_int_arith {
    ($($t:ty),*) => {$(
        impl Arith for $t {
            fn add(self, rhs: Self) -> Self {
                WrappingAdd::wrapping_add(&self, &rhs)
            }
            fn sub(self, rhs: Self) -> Self {
                WrappingSub::wrapping_sub(&self, &rhs)
            }
            fn mul(self, rhs: Self) -> Self {
                WrappingMul::wrapping_mul(&self, &rhs)
            }
            fn div(self, rhs: Self) -> Result<Self> {
                if rhs == 0 {
                    return Err(Error::Arithmetic(format!(
                        "{self} / 0: integer division by zero"
                    )));
                }
                Ok(<$t>::wrapping_div(self, rhs))
            }
        }
    )*};
}

macro_rules! impl_field_arith {
    ($($t:ty),*) => {$(
        impl Arith for $t {
            fn add(self, rhs: Self) -> Self {
                self + rhs
            }
            fn sub(self, rhs: Self) -> Self {
                self - rhs
            }
            fn mul(self, rhs: Self) -> Self {
                self * rhs
            }
            fn div(self, rhs: Self) -> Result<Self> {
                Ok(self / rhs)
            }
        }
    )*};
}

impl_int_arith!(i8, i16, i32, i64, u8, u16, u32, u64);
impl_field_arith!(Float16, f32, f64, Complex32, Complex64);

/// The four arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithOp {
    /// Every operator, in declaration order.
    pub const ALL: [ArithOp; 4] = [
        ArithOp::Add,
        ArithOp::Subtract,
        ArithOp::Multiply,
        ArithOp::Divide,
    ];

    /// Name of the callable implementing the operator.
    pub fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Subtract => "subtract",
            ArithOp::Multiply => "multiply",
            ArithOp::Divide => "divide",
        }
    }

    fn apply<T: Arith>(self, a: T, b: T) -> Result<T> {
        match self {
            ArithOp::Add => Ok(a.add(b)),
            ArithOp::Subtract => Ok(a.sub(b)),
            ArithOp::Multiply => Ok(a.mul(b)),
            ArithOp::Divide => a.div(b),
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn overload<T: Arith>(op: ArithOp) -> Callable {
    apply::try_binary(op.name(), move |a: T, b: T| op.apply(a, b))
}

fn build(op: ArithOp) -> Result<Callable> {
    let overloads = [
        overload::<i8>(op),
        overload::<i16>(op),
        overload::<i32>(op),
        overload::<i64>(op),
        overload::<u8>(op),
        overload::<u16>(op),
        overload::<u32>(op),
        overload::<u64>(op),
        overload::<Float16>(op),
        overload::<f32>(op),
        overload::<f64>(op),
        overload::<Complex32>(op),
        overload::<Complex64>(op),
    ];
    let md = Multidispatch::new(op.name(), FuncProto::parse("(Any, Any) -> Any")?, overloads)?;
    Ok(std::sync::Arc::new(md.with_promotion()))
}

/// The arithmetic callable for `op`.
pub fn arithmetic(op: ArithOp) -> Result<Callable> {
    static TABLES: [OnceLock<Callable>; 4] = [const { OnceLock::new() }; 4];
    let cell = &TABLES[op as usize];
    if let Some(f) = cell.get() {
        return Ok(f.clone());
    }
    let f = build(op)?;
    Ok(cell.get_or_init(|| f).clone())
}

/// `a + b`, wrapping on integer overflow.
pub fn add() -> Result<Callable> {
    arithmetic(ArithOp::Add)
}

/// `a - b`, wrapping on integer overflow.
pub fn subtract() -> Result<Callable> {
    arithmetic(ArithOp::Subtract)
}

/// `a * b`, wrapping on integer overflow.
pub fn multiply() -> Result<Callable> {
    arithmetic(ArithOp::Multiply)
}

/// `a / b`; integer division by zero fails with [`Error::Arithmetic`].
pub fn divide() -> Result<Callable> {
    arithmetic(ArithOp::Divide)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::build_kernel;
    use ndkern_core::kernel::KernelRequest;
    use ndkern_core::types::DType;

    fn run<A: BuiltinScalar, B: BuiltinScalar, R: BuiltinScalar + Default>(
        f: &Callable,
        a: A,
        b: B,
    ) -> ndkern_core::Result<R> {
        let (dst, mut k) = build_kernel(&**f, &[DType::of::<A>(), DType::of::<B>()], KernelRequest::Single)?;
        assert_eq!(dst, DType::of::<R>());
        let mut out = R::default();
        unsafe {
            k.single(
                (&mut out as *mut R).cast(),
                &[(&a as *const A).cast(), (&b as *const B).cast()],
            )?
        };
        Ok(out)
    }

    #[test]
    fn same_type_operations() -> anyhow::Result<()> {
        assert_eq!(run::<i32, i32, i32>(&add()?, 2, 3)?, 5);
        assert_eq!(run::<u8, u8, u8>(&add()?, 250, 10)?, 4);
        assert_eq!(run::<f64, f64, f64>(&subtract()?, 1.5, 2.0)?, -0.5);
        assert_eq!(run::<i16, i16, i16>(&multiply()?, -7, 6)?, -42);
        assert_eq!(run::<i64, i64, i64>(&divide()?, -7, 2)?, -3);
        let z = run::<Complex64, Complex64, Complex64>(&multiply()?, Complex64::new(0.0, 1.0), Complex64::new(0.0, 1.0))?;
        assert_eq!(z, Complex64::new(-1.0, 0.0));
        Ok(())
    }

    #[test]
    fn mixed_operands_promote() -> anyhow::Result<()> {
        assert_eq!(run::<i32, f32, f64>(&add()?, 1, 0.25)?, 1.25);
        assert_eq!(run::<u8, i8, i16>(&subtract()?, 200, -100)?, 300);
        assert_eq!(run::<bool, i32, i32>(&add()?, true, 41)?, 42);
        assert_eq!(run::<f32, Complex32, Complex32>(&add()?, 1.0, Complex32::new(0.0, 2.0))?, Complex32::new(1.0, 2.0));
        Ok(())
    }

    #[test]
    fn integer_division_by_zero_fails() -> anyhow::Result<()> {
        let err = run::<i32, i32, i32>(&divide()?, 1, 0).unwrap_err();
        assert!(matches!(err, Error::Arithmetic(_)));
        assert!(run::<f64, f64, f64>(&divide()?, 1.0, 0.0)?.is_infinite());
        Ok(())
    }

    #[test]
    fn bool_pairs_have_no_arithmetic() -> anyhow::Result<()> {
        assert!(add()?.resolve(&[DType::BOOL, DType::BOOL]).is_err());
        Ok(())
    }
}
