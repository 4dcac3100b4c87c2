use super::{Kind, TypeId, builtin_info};

fn bits(id: TypeId) -> usize {
    builtin_info(id).size * 8
}

fn signed_of_bits(bits: usize) -> Option<TypeId> {
    match bits {
        8 => Some(TypeId::Int8),
        16 => Some(TypeId::Int16),
        32 => Some(TypeId::Int32),
        64 => Some(TypeId::Int64),
        _ => None,
    }
}

/// Narrowest float holding every value of an integer of `bits` bits.
fn float_for_int(bits: usize) -> TypeId {
    match bits {
        8 => TypeId::Float16,
        16 => TypeId::Float32,
        _ => TypeId::Float64,
    }
}

fn wider(a: TypeId, b: TypeId) -> TypeId {
    if bits(a) >= bits(b) { a } else { b }
}

/// Common type of two builtin operands for arithmetic.
///
/// Follows the usual numeric tower: bool promotes to anything, mixed signedness picks a signed
/// type wide enough for both (falling back to `float64` for `int64` with `uint64`), integers
/// with floats pick a float whose mantissa covers the integer when one exists, and complex
/// results keep the wider component.
pub fn promote_types(a: TypeId, b: TypeId) -> Option<TypeId> {
    if !a.is_builtin() || !b.is_builtin() {
        return None;
    }
    if a == b {
        return Some(a);
    }
    let (ka, kb) = (builtin_info(a).kind, builtin_info(b).kind);
    let out = match (ka, kb) {
        (Kind::Bool, _) => b,
        (_, Kind::Bool) => a,
        (Kind::Int, Kind::Int) | (Kind::UInt, Kind::UInt) => wider(a, b),
        (Kind::Int, Kind::UInt) | (Kind::UInt, Kind::Int) => {
            let (s, u) = if ka == Kind::Int { (a, b) } else { (b, a) };
            if bits(s) > bits(u) {
                s
            } else {
                signed_of_bits(bits(u) * 2).unwrap_or(TypeId::Float64)
            }
        }
        (Kind::Real, Kind::Real) => wider(a, b),
        (Kind::Real, Kind::Int | Kind::UInt) => wider(a, float_for_int(bits(b))),
        (Kind::Int | Kind::UInt, Kind::Real) => wider(b, float_for_int(bits(a))),
        (Kind::Complex, _) | (_, Kind::Complex) => {
            let (c, other) = if ka == Kind::Complex { (a, b) } else { (b, a) };
            let component = if c == TypeId::Complex128 { TypeId::Float64 } else { TypeId::Float32 };
            let other = match builtin_info(other).kind {
                Kind::Complex if other == TypeId::Complex128 => TypeId::Float64,
                Kind::Complex => TypeId::Float32,
                _ => other,
            };
            match promote_types(component, other)? {
                TypeId::Float64 => TypeId::Complex128,
                _ => TypeId::Complex64,
            }
        }
        _ => return None,
    };
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use TypeId::*;

    #[test]
    fn promotion_table() {
        assert_eq!(promote_types(Int32, Int32), Some(Int32));
        assert_eq!(promote_types(Bool, UInt16), Some(UInt16));
        assert_eq!(promote_types(Int8, Int64), Some(Int64));
        assert_eq!(promote_types(UInt8, Int8), Some(Int16));
        assert_eq!(promote_types(UInt8, Int32), Some(Int32));
        assert_eq!(promote_types(UInt32, Int32), Some(Int64));
        assert_eq!(promote_types(UInt64, Int64), Some(Float64));
        assert_eq!(promote_types(Float16, Int8), Some(Float16));
        assert_eq!(promote_types(Float16, Int16), Some(Float32));
        assert_eq!(promote_types(Int64, Float32), Some(Float64));
        assert_eq!(promote_types(Float32, Float64), Some(Float64));
        assert_eq!(promote_types(Complex64, Float64), Some(Complex128));
        assert_eq!(promote_types(Int16, Complex64), Some(Complex64));
        assert_eq!(promote_types(Complex64, Complex128), Some(Complex128));
        assert_eq!(promote_types(Int32, Struct), None);
    }

    #[test]
    fn promotion_is_symmetric() {
        for a in TypeId::BUILTINS {
            for b in TypeId::BUILTINS {
                assert_eq!(promote_types(a, b), promote_types(b, a), "{a:?} {b:?}");
            }
        }
    }
}
