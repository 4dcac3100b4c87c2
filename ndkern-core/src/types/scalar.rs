//! Rust scalars backing the builtin dtypes, and checked conversion between them.
//!
//! Every builtin value widens exactly into a [`Scalar`]; narrowing back into a destination type
//! is where the error mode is enforced.

use core::fmt;

use half::f16;
use num_complex::Complex;
use num_traits::AsPrimitive;

use super::TypeId;
use crate::assign::ErrorMode;
use crate::error::RangeReason;

pub use half::f16 as Float16;
pub use num_complex::{Complex32, Complex64};

/// Exact intermediate of every builtin value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i128),
    Float(f64),
    Complex(Complex<f64>),
}

impl Scalar {
    /// Parses text as produced by the numeric to string conversion.
    ///
    /// Accepts `true`/`false`, integers, floats (including `inf` and `nan`) and complex numbers
    /// written `re+imj`, `imj` or `(re+imj)`.
    pub fn parse(text: &str) -> Option<Scalar> {
        let t = text.trim();
        if t.eq_ignore_ascii_case("true") {
            return Some(Scalar::Bool(true));
        }
        if t.eq_ignore_ascii_case("false") {
            return Some(Scalar::Bool(false));
        }
        if let Ok(i) = t.parse::<i128>() {
            return Some(Scalar::Int(i));
        }
        if let Ok(x) = t.parse::<f64>() {
            return Some(Scalar::Float(x));
        }
        let t = t
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(t)
            .trim();
        let body = t.strip_suffix('j')?;
        let bytes = body.as_bytes();
        let split = (1..bytes.len()).rev().find(|&i| {
            (bytes[i] == b'+' || bytes[i] == b'-') && !matches!(bytes[i - 1], b'e' | b'E')
        });
        match split {
            Some(i) => {
                let re = body[..i].trim().parse::<f64>().ok()?;
                let im = body[i..].trim().parse::<f64>().ok()?;
                Some(Scalar::Complex(Complex::new(re, im)))
            }
            None => {
                let im = body.trim().parse::<f64>().ok()?;
                Some(Scalar::Complex(Complex::new(0.0, im)))
            }
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x:?}"),
            Scalar::Complex(c) => write!(f, "({:?}{:+?}j)", c.re, c.im),
        }
    }
}

/// A Rust type that is the in-memory representation of a builtin dtype.
pub trait BuiltinScalar: Copy + Send + Sync + PartialEq + fmt::Debug + 'static {
    const TYPE_ID: TypeId;

    fn to_scalar(self) -> Scalar;

    /// Narrows a scalar into `Self`, applying the checks `mode` asks for.
    fn from_scalar(v: Scalar, mode: ErrorMode) -> Result<Self, RangeReason>;

    /// Writes the value the way string conversion and diagnostics show it.
    fn fmt_value(&self, out: &mut dyn fmt::Write) -> fmt::Result;
}

fn check_imag(im: f64, mode: ErrorMode) -> Result<(), RangeReason> {
    if mode >= ErrorMode::Overflow && im != 0.0 {
        Err(RangeReason::Imaginary)
    } else {
        Ok(())
    }
}

fn float_to_int<T>(x: f64, mode: ErrorMode) -> Result<T, RangeReason>
where
    T: TryFrom<i128> + Copy + 'static,
    f64: AsPrimitive<T>,
{
    if mode == ErrorMode::None {
        return Ok(x.as_());
    }
    if !x.is_finite() {
        return Err(RangeReason::Overflow);
    }
    let t = x.trunc();
    let v = T::try_from(t as i128).map_err(|_| RangeReason::Overflow)?;
    if mode >= ErrorMode::Fractional && t != x {
        return Err(RangeReason::Fractional);
    }
    Ok(v)
}

fn int_from_scalar<T>(v: Scalar, mode: ErrorMode) -> Result<T, RangeReason>
where
    T: TryFrom<i128> + Copy + 'static,
    i128: AsPrimitive<T>,
    f64: AsPrimitive<T>,
{
    match v {
        Scalar::Bool(b) => Ok((b as i128).as_()),
        Scalar::Int(i) if mode == ErrorMode::None => Ok(i.as_()),
        Scalar::Int(i) => T::try_from(i).map_err(|_| RangeReason::Overflow),
        Scalar::Float(x) => float_to_int(x, mode),
        Scalar::Complex(c) => {
            check_imag(c.im, mode)?;
            float_to_int(c.re, mode)
        }
    }
}

/// Checks a float narrowed to `back` (widened again) against the original `x`.
fn check_narrow(x: f64, back: f64, mode: ErrorMode) -> Result<(), RangeReason> {
    if mode >= ErrorMode::Overflow && x.is_finite() && back.is_infinite() {
        return Err(RangeReason::Overflow);
    }
    if mode >= ErrorMode::Inexact && back != x && !x.is_nan() {
        return Err(RangeReason::Inexact);
    }
    Ok(())
}

/// Checks an integer converted to the float `back`.
fn check_int_to_float(i: i128, back: f64, mode: ErrorMode) -> Result<(), RangeReason> {
    if mode >= ErrorMode::Overflow && back.is_infinite() {
        return Err(RangeReason::Overflow);
    }
    if mode >= ErrorMode::Inexact && back as i128 != i {
        return Err(RangeReason::Inexact);
    }
    Ok(())
}

macro_rules! impl_int_scalar {
    ($($t:ty => $id:ident),* $(,)?) => {$(
        impl BuiltinScalar for $t {
            const TYPE_ID: TypeId = TypeId::$id;

            fn to_scalar(self) -> Scalar {
                Scalar::Int(i128::from(self))
            }

            fn from_scalar(v: Scalar, mode: ErrorMode) -> Result<Self, RangeReason> {
                int_from_scalar::<$t>(v, mode)
            }

            fn fmt_value(&self, out: &mut dyn fmt::Write) -> fmt::Result {
                write!(out, "{self}")
            }
        }
    )*};
}

impl_int_scalar!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
);

impl BuiltinScalar for bool {
    const TYPE_ID: TypeId = TypeId::Bool;

    fn to_scalar(self) -> Scalar {
        Scalar::Bool(self)
    }

    fn from_scalar(v: Scalar, mode: ErrorMode) -> Result<Self, RangeReason> {
        let lenient = mode == ErrorMode::None;
        match v {
            Scalar::Bool(b) => Ok(b),
            Scalar::Int(i) if lenient => Ok(i != 0),
            Scalar::Int(0) => Ok(false),
            Scalar::Int(1) => Ok(true),
            Scalar::Int(_) => Err(RangeReason::Overflow),
            Scalar::Float(x) if lenient => Ok(x != 0.0),
            Scalar::Float(x) if x == 0.0 => Ok(false),
            Scalar::Float(x) if x == 1.0 => Ok(true),
            Scalar::Float(_) => Err(RangeReason::Overflow),
            Scalar::Complex(c) if lenient => Ok(c.re != 0.0 || c.im != 0.0),
            Scalar::Complex(c) => {
                check_imag(c.im, mode)?;
                bool::from_scalar(Scalar::Float(c.re), mode)
            }
        }
    }

    fn fmt_value(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "{self}")
    }
}

impl BuiltinScalar for f64 {
    const TYPE_ID: TypeId = TypeId::Float64;

    fn to_scalar(self) -> Scalar {
        Scalar::Float(self)
    }

    fn from_scalar(v: Scalar, mode: ErrorMode) -> Result<Self, RangeReason> {
        match v {
            Scalar::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
            Scalar::Int(i) => {
                let y = i as f64;
                check_int_to_float(i, y, mode)?;
                Ok(y)
            }
            Scalar::Float(x) => Ok(x),
            Scalar::Complex(c) => {
                check_imag(c.im, mode)?;
                Ok(c.re)
            }
        }
    }

    fn fmt_value(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "{self:?}")
    }
}

impl BuiltinScalar for f32 {
    const TYPE_ID: TypeId = TypeId::Float32;

    fn to_scalar(self) -> Scalar {
        Scalar::Float(self as f64)
    }

    fn from_scalar(v: Scalar, mode: ErrorMode) -> Result<Self, RangeReason> {
        match v {
            Scalar::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
            Scalar::Int(i) => {
                let y = i as f32;
                check_int_to_float(i, y as f64, mode)?;
                Ok(y)
            }
            Scalar::Float(x) => {
                let y = x as f32;
                check_narrow(x, y as f64, mode)?;
                Ok(y)
            }
            Scalar::Complex(c) => {
                check_imag(c.im, mode)?;
                f32::from_scalar(Scalar::Float(c.re), mode)
            }
        }
    }

    fn fmt_value(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "{self:?}")
    }
}

impl BuiltinScalar for f16 {
    const TYPE_ID: TypeId = TypeId::Float16;

    fn to_scalar(self) -> Scalar {
        Scalar::Float(self.to_f64())
    }

    fn from_scalar(v: Scalar, mode: ErrorMode) -> Result<Self, RangeReason> {
        match v {
            Scalar::Bool(b) => Ok(if b { f16::ONE } else { f16::ZERO }),
            Scalar::Int(i) => {
                let y = f16::from_f64(i as f64);
                check_int_to_float(i, y.to_f64(), mode)?;
                Ok(y)
            }
            Scalar::Float(x) => {
                let y = f16::from_f64(x);
                check_narrow(x, y.to_f64(), mode)?;
                Ok(y)
            }
            Scalar::Complex(c) => {
                check_imag(c.im, mode)?;
                f16::from_scalar(Scalar::Float(c.re), mode)
            }
        }
    }

    fn fmt_value(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "{:?}", self.to_f32())
    }
}

macro_rules! impl_complex_scalar {
    ($($t:ty => $id:ident),* $(,)?) => {$(
        impl BuiltinScalar for Complex<$t> {
            const TYPE_ID: TypeId = TypeId::$id;

            fn to_scalar(self) -> Scalar {
                Scalar::Complex(Complex::new(self.re as f64, self.im as f64))
            }

            fn from_scalar(v: Scalar, mode: ErrorMode) -> Result<Self, RangeReason> {
                match v {
                    Scalar::Complex(c) => Ok(Complex::new(
                        <$t>::from_scalar(Scalar::Float(c.re), mode)?,
                        <$t>::from_scalar(Scalar::Float(c.im), mode)?,
                    )),
                    real => Ok(Complex::new(<$t>::from_scalar(real, mode)?, 0.0)),
                }
            }

            fn fmt_value(&self, out: &mut dyn fmt::Write) -> fmt::Result {
                write!(out, "({:?}{:+?}j)", self.re, self.im)
            }
        }
    )*};
}

impl_complex_scalar!(f32 => Complex64, f64 => Complex128);

/// Runs `$body` with `$T` aliased to the Rust scalar of the builtin tag `$id`.
#[macro_export]
macro_rules! with_builtin_type {
    ($id:expr, $T:ident => $body:expr, _ => $fallback:expr) => {
        match $id {
            $crate::types::TypeId::Bool => {
                type $T = bool;
                $body
            }
            $crate::types::TypeId::Int8 => {
                type $T = i8;
                $body
            }
            $crate::types::TypeId::Int16 => {
                type $T = i16;
                $body
            }
            $crate::types::TypeId::Int32 => {
                type $T = i32;
                $body
            }
            $crate::types::TypeId::Int64 => {
                type $T = i64;
                $body
            }
            $crate::types::TypeId::UInt8 => {
                type $T = u8;
                $body
            }
            $crate::types::TypeId::UInt16 => {
                type $T = u16;
                $body
            }
            $crate::types::TypeId::UInt32 => {
                type $T = u32;
                $body
            }
            $crate::types::TypeId::UInt64 => {
                type $T = u64;
                $body
            }
            $crate::types::TypeId::Float16 => {
                type $T = $crate::types::Float16;
                $body
            }
            $crate::types::TypeId::Float32 => {
                type $T = f32;
                $body
            }
            $crate::types::TypeId::Float64 => {
                type $T = f64;
                $body
            }
            $crate::types::TypeId::Complex64 => {
                type $T = $crate::types::Complex32;
                $body
            }
            $crate::types::TypeId::Complex128 => {
                type $T = $crate::types::Complex64;
                $body
            }
            _ => $fallback,
        }
    };
}

/// # Safety
///
/// `data` must point to a readable value of the builtin type `id`.
pub(crate) unsafe fn print_builtin(
    id: TypeId,
    out: &mut dyn fmt::Write,
    data: *const u8,
) -> fmt::Result {
    with_builtin_type!(id, T => {
        // SAFETY: guaranteed by the caller.
        let v = unsafe { core::ptr::read_unaligned(data.cast::<T>()) };
        v.fmt_value(out)
    }, _ => Err(fmt::Error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ErrorMode::*;

    fn conv<D: BuiltinScalar>(v: Scalar, mode: ErrorMode) -> Result<D, RangeReason> {
        D::from_scalar(v, mode)
    }

    #[test]
    fn float_to_int_modes() {
        assert_eq!(conv::<i32>(Scalar::Float(1.5), None), Ok(1));
        assert_eq!(conv::<i32>(Scalar::Float(-3.5), None), Ok(-3));
        assert_eq!(conv::<i32>(Scalar::Float(1.5), Overflow), Ok(1));
        assert_eq!(
            conv::<i32>(Scalar::Float(1.5), Fractional),
            Err(RangeReason::Fractional)
        );
        assert_eq!(conv::<i32>(Scalar::Float(4.0), Inexact), Ok(4));
        assert_eq!(conv::<u8>(Scalar::Float(f64::NAN), None), Ok(0));
        assert_eq!(conv::<u8>(Scalar::Float(300.0), None), Ok(255));
        assert_eq!(
            conv::<u8>(Scalar::Float(300.0), Overflow),
            Err(RangeReason::Overflow)
        );
        assert_eq!(
            conv::<i64>(Scalar::Float(9.3e18), Overflow),
            Err(RangeReason::Overflow)
        );
    }

    #[test]
    fn int_to_int_modes() {
        assert_eq!(conv::<i8>(Scalar::Int(300), None), Ok(44));
        assert_eq!(
            conv::<i8>(Scalar::Int(300), Overflow),
            Err(RangeReason::Overflow)
        );
        assert_eq!(conv::<u16>(Scalar::Int(-1), None), Ok(u16::MAX));
        assert_eq!(conv::<u64>(Scalar::Int(u64::MAX as i128), Inexact), Ok(u64::MAX));
    }

    #[test]
    fn float_narrowing() {
        assert_eq!(conv::<f32>(Scalar::Float(0.1), Fractional), Ok(0.1f32));
        assert_eq!(
            conv::<f32>(Scalar::Float(0.1), Inexact),
            Err(RangeReason::Inexact)
        );
        assert_eq!(
            conv::<f32>(Scalar::Float(1e300), Overflow),
            Err(RangeReason::Overflow)
        );
        assert!(conv::<f32>(Scalar::Float(1e300), None).is_ok_and(|x| x.is_infinite()));
        assert_eq!(
            conv::<f16>(Scalar::Int(70000), Overflow),
            Err(RangeReason::Overflow)
        );
        assert_eq!(
            conv::<f16>(Scalar::Int(2049), Inexact),
            Err(RangeReason::Inexact)
        );
        assert_eq!(conv::<f16>(Scalar::Int(2048), Inexact), Ok(f16::from_f32(2048.0)));
        assert_eq!(
            conv::<f64>(Scalar::Int((1i128 << 53) + 1), Inexact),
            Err(RangeReason::Inexact)
        );
    }

    #[test]
    fn complex_boundary() {
        let c = Scalar::Complex(Complex::new(2.0, 1.0));
        assert_eq!(conv::<f64>(c, None), Ok(2.0));
        assert_eq!(conv::<f64>(c, Overflow), Err(RangeReason::Imaginary));
        assert_eq!(conv::<i32>(c, None), Ok(2));
        let r = Scalar::Complex(Complex::new(3.0, -0.0));
        assert_eq!(conv::<i32>(r, Inexact), Ok(3));
        assert_eq!(
            conv::<Complex<f32>>(Scalar::Float(0.1), Inexact),
            Err(RangeReason::Inexact)
        );
        assert_eq!(
            conv::<Complex<f64>>(Scalar::Int(5), Inexact),
            Ok(Complex::new(5.0, 0.0))
        );
    }

    #[test]
    fn bool_destination() {
        assert_eq!(conv::<bool>(Scalar::Int(7), None), Ok(true));
        assert_eq!(conv::<bool>(Scalar::Int(7), Overflow), Err(RangeReason::Overflow));
        assert_eq!(conv::<bool>(Scalar::Float(1.0), Inexact), Ok(true));
        assert_eq!(conv::<bool>(Scalar::Float(0.5), Overflow), Err(RangeReason::Overflow));
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(Scalar::parse(" 42 "), Some(Scalar::Int(42)));
        assert_eq!(Scalar::parse("TRUE"), Some(Scalar::Bool(true)));
        assert_eq!(Scalar::parse("1.5e3"), Some(Scalar::Float(1500.0)));
        assert_eq!(
            Scalar::parse("(1.5-2j)"),
            Some(Scalar::Complex(Complex::new(1.5, -2.0)))
        );
        assert_eq!(
            Scalar::parse("1e-3+2e+1j"),
            Some(Scalar::Complex(Complex::new(1e-3, 20.0)))
        );
        assert_eq!(Scalar::parse("3j"), Some(Scalar::Complex(Complex::new(0.0, 3.0))));
        assert_eq!(Scalar::parse("abc"), Option::None);
        assert_eq!(Scalar::Float(4.0).to_string(), "4.0");
        assert_eq!(Scalar::Complex(Complex::new(1.0, -2.0)).to_string(), "(1.0-2.0j)");
    }
}
