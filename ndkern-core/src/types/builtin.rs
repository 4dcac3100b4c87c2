use super::{Kind, TypeId};

/// Static attributes of a builtin scalar.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinInfo {
    pub name: &'static str,
    pub kind: Kind,
    pub size: usize,
    pub align: usize,
}

const fn info(name: &'static str, kind: Kind, size: usize, align: usize) -> BuiltinInfo {
    BuiltinInfo {
        name,
        kind,
        size,
        align,
    }
}

/// Attributes of a builtin tag.
///
/// # Panics
///
/// Panics on a non-builtin tag.
pub fn builtin_info(id: TypeId) -> BuiltinInfo {
    match id {
        TypeId::Bool => info("bool", Kind::Bool, 1, 1),
        TypeId::Int8 => info("int8", Kind::Int, 1, 1),
        TypeId::Int16 => info("int16", Kind::Int, 2, 2),
        TypeId::Int32 => info("int32", Kind::Int, 4, 4),
        TypeId::Int64 => info("int64", Kind::Int, 8, 8),
        TypeId::UInt8 => info("uint8", Kind::UInt, 1, 1),
        TypeId::UInt16 => info("uint16", Kind::UInt, 2, 2),
        TypeId::UInt32 => info("uint32", Kind::UInt, 4, 4),
        TypeId::UInt64 => info("uint64", Kind::UInt, 8, 8),
        TypeId::Float16 => info("float16", Kind::Real, 2, 2),
        TypeId::Float32 => info("float32", Kind::Real, 4, 4),
        TypeId::Float64 => info("float64", Kind::Real, 8, 8),
        TypeId::Complex64 => info("complex64", Kind::Complex, 8, 4),
        TypeId::Complex128 => info("complex128", Kind::Complex, 16, 8),
        other => panic!("{other:?} is not a builtin type"),
    }
}

/// Looks a builtin up by its printed name.
pub(crate) fn builtin_by_name(name: &str) -> Option<TypeId> {
    TypeId::BUILTINS
        .into_iter()
        .find(|&id| builtin_info(id).name == name)
}

/// Number of mantissa bits (including the implicit one) of a real or complex component.
fn mantissa_bits(id: TypeId) -> Option<u32> {
    match id {
        TypeId::Float16 => Some(11),
        TypeId::Float32 | TypeId::Complex64 => Some(24),
        TypeId::Float64 | TypeId::Complex128 => Some(53),
        _ => None,
    }
}

/// Value bits of an integer type, excluding the sign bit.
fn int_bits(id: TypeId) -> Option<(u32, bool)> {
    match id {
        TypeId::Int8 => Some((7, true)),
        TypeId::Int16 => Some((15, true)),
        TypeId::Int32 => Some((31, true)),
        TypeId::Int64 => Some((63, true)),
        TypeId::UInt8 => Some((8, false)),
        TypeId::UInt16 => Some((16, false)),
        TypeId::UInt32 => Some((32, false)),
        TypeId::UInt64 => Some((64, false)),
        _ => None,
    }
}

fn float_rank(id: TypeId) -> Option<u8> {
    match id {
        TypeId::Float16 => Some(0),
        TypeId::Float32 | TypeId::Complex64 => Some(1),
        TypeId::Float64 | TypeId::Complex128 => Some(2),
        _ => None,
    }
}

/// Whether every value of builtin `src` is represented exactly by builtin `dst`.
pub fn builtin_lossless(dst: TypeId, src: TypeId) -> bool {
    if dst == src {
        return true;
    }
    let (dk, sk) = (builtin_info(dst).kind, builtin_info(src).kind);
    match (dk, sk) {
        (_, Kind::Bool) => true,
        (Kind::Bool, _) => false,
        (Kind::Int | Kind::UInt, Kind::Int | Kind::UInt) => {
            let (Some((db, dsigned)), Some((sb, ssigned))) = (int_bits(dst), int_bits(src)) else {
                return false;
            };
            match (dsigned, ssigned) {
                (true, true) | (false, false) => db >= sb,
                (true, false) => db >= sb,
                (false, true) => false,
            }
        }
        (Kind::Real | Kind::Complex, Kind::Int | Kind::UInt) => {
            let (Some(m), Some((sb, _))) = (mantissa_bits(dst), int_bits(src)) else {
                return false;
            };
            m >= sb
        }
        (Kind::Real, Kind::Real) | (Kind::Complex, Kind::Real) | (Kind::Complex, Kind::Complex) => {
            float_rank(dst) >= float_rank(src)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lossless_table() {
        use TypeId::*;
        assert!(builtin_lossless(Int64, Int32));
        assert!(!builtin_lossless(Int32, Int64));
        assert!(builtin_lossless(Int16, UInt8));
        assert!(!builtin_lossless(Int8, UInt8));
        assert!(!builtin_lossless(UInt64, Int8));
        assert!(builtin_lossless(Float16, UInt8));
        assert!(!builtin_lossless(Float16, Int16));
        assert!(builtin_lossless(Float32, Int16));
        assert!(builtin_lossless(Float64, UInt32));
        assert!(!builtin_lossless(Float64, Int64));
        assert!(builtin_lossless(Complex64, Float32));
        assert!(!builtin_lossless(Complex64, Float64));
        assert!(builtin_lossless(Complex128, Complex64));
        assert!(!builtin_lossless(Float64, Complex64));
        assert!(builtin_lossless(Float32, Bool));
        assert!(!builtin_lossless(Bool, Int8));
    }

    #[test]
    fn names_round_trip() {
        for id in TypeId::BUILTINS {
            assert_eq!(builtin_by_name(builtin_info(id).name), Some(id));
        }
    }
}
