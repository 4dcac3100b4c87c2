//! Comparison callables: `less`, `less_equal`, `equal`, `not_equal`, `greater_equal`,
//! `greater`.
//!
//! Every callable returns `int32` 0 or 1. Mixed numeric operands are compared exactly: an
//! `int64` is never rounded to a float to compare it with a `float64`. NaN compares unequal
//! to everything, including itself. Complex operands only support `equal` and `not_equal`.

use core::cmp::Ordering;
use core::fmt;
use std::sync::{Arc, OnceLock};

use ndkern_core::arrmeta::MetaSlot;
use ndkern_core::kernel::{Children, KernelBuilder, KernelFrame, KernelRequest};
use ndkern_core::types::{
    BuiltinScalar, DType, FixedString, FuncProto, KindPattern, Scalar, StructPattern, StructType,
    TypeId,
};
use ndkern_core::{Error, Result};

use crate::apply::{self, PairVisitor, visit_builtin_pair};
use crate::callable::{BaseCallable, Callable, check_arity};
use crate::multidispatch::Multidispatch;

/// The six comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Less,
    LessEqual,
    Equal,
    NotEqual,
    GreaterEqual,
    Greater,
}

impl CmpOp {
    pub const ALL: [CmpOp; 6] = [
        CmpOp::Less,
        CmpOp::LessEqual,
        CmpOp::Equal,
        CmpOp::NotEqual,
        CmpOp::GreaterEqual,
        CmpOp::Greater,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CmpOp::Less => "less",
            CmpOp::LessEqual => "less_equal",
            CmpOp::Equal => "equal",
            CmpOp::NotEqual => "not_equal",
            CmpOp::GreaterEqual => "greater_equal",
            CmpOp::Greater => "greater",
        }
    }

    /// Whether the operator only tests equality.
    pub fn is_equality(self) -> bool {
        matches!(self, CmpOp::Equal | CmpOp::NotEqual)
    }

    /// Applies the operator to an ordering; `None` stands for unordered operands.
    pub fn holds(self, ord: Option<Ordering>) -> bool {
        match (self, ord) {
            (CmpOp::NotEqual, None) => true,
            (_, None) => false,
            (CmpOp::Less, Some(o)) => o.is_lt(),
            (CmpOp::LessEqual, Some(o)) => o.is_le(),
            (CmpOp::Equal, Some(o)) => o.is_eq(),
            (CmpOp::NotEqual, Some(o)) => o.is_ne(),
            (CmpOp::GreaterEqual, Some(o)) => o.is_ge(),
            (CmpOp::Greater, Some(o)) => o.is_gt(),
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Exact ordering of an integer and a float.
fn cmp_int_float(i: i128, x: f64) -> Option<Ordering> {
    // rounds up to 2^127, just above every i128
    const LIMIT: f64 = i128::MAX as f64;
    if x.is_nan() {
        return None;
    }
    if x >= LIMIT {
        return Some(Ordering::Less);
    }
    if x < -LIMIT {
        return Some(Ordering::Greater);
    }
    let t = x.trunc();
    match i.cmp(&(t as i128)) {
        Ordering::Equal => 0f64.partial_cmp(&(x - t)),
        o => Some(o),
    }
}

fn as_real(v: Scalar) -> Scalar {
    match v {
        Scalar::Bool(b) => Scalar::Int(i128::from(b)),
        other => other,
    }
}

/// Exact ordering of two real scalars; `None` for NaN or complex operands.
pub fn compare_scalars(a: Scalar, b: Scalar) -> Option<Ordering> {
    match (as_real(a), as_real(b)) {
        (Scalar::Int(x), Scalar::Int(y)) => Some(x.cmp(&y)),
        (Scalar::Float(x), Scalar::Float(y)) => x.partial_cmp(&y),
        (Scalar::Int(x), Scalar::Float(y)) => cmp_int_float(x, y),
        (Scalar::Float(x), Scalar::Int(y)) => cmp_int_float(y, x).map(Ordering::reverse),
        _ => None,
    }
}

/// Ordering used by equality operators, where complex operands are allowed.
fn equality_order(a: Scalar, b: Scalar) -> Option<Ordering> {
    let parts = |v: Scalar| match v {
        Scalar::Complex(c) => (Scalar::Float(c.re), c.im),
        other => (other, 0.0),
    };
    let ((ra, ia), (rb, ib)) = (parts(a), parts(b));
    match compare_scalars(ra, rb) {
        Some(Ordering::Equal) if ia == ib => Some(Ordering::Equal),
        Some(Ordering::Equal) if ia.is_nan() || ib.is_nan() => None,
        Some(Ordering::Equal) => Some(Ordering::Less),
        other => other.map(|_| Ordering::Less),
    }
}

struct BuiltinComparison(CmpOp);

impl PairVisitor for BuiltinComparison {
    type Output = Callable;

    fn visit<A: BuiltinScalar, B: BuiltinScalar>(&self) -> Callable {
        let op = self.0;
        let complex = A::TYPE_ID >= TypeId::Complex64 || B::TYPE_ID >= TypeId::Complex64;
        if complex {
            apply::binary(op.name(), move |a: A, b: B| {
                op.holds(equality_order(a.to_scalar(), b.to_scalar())) as i32
            })
        } else {
            apply::binary(op.name(), move |a: A, b: B| {
                op.holds(compare_scalars(a.to_scalar(), b.to_scalar())) as i32
            })
        }
    }
}

/// `(FixedString, FixedString) -> int32`: code point order of the decoded texts.
#[derive(Debug)]
struct StringComparison {
    op: CmpOp,
    proto: FuncProto,
}

impl BaseCallable for StringComparison {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn proto(&self) -> &FuncProto {
        &self.proto
    }

    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        _dst: &DType,
        _dst_meta: &[MetaSlot],
        src: &[DType],
        _src_meta: &[&[MetaSlot]],
        kernreq: KernelRequest,
    ) -> Result<usize> {
        check_arity(self.name(), &self.proto, src)?;
        let string = |tp: &DType| {
            tp.downcast::<FixedString>()
                .map(|s| FixedString::new(s.len(), s.encoding()))
                .ok_or_else(|| Error::SignatureMismatch {
                    proto: self.proto.to_string(),
                    operands: src.to_vec(),
                })
        };
        Ok(ckb.emplace(
            StringCompareFrame {
                op: self.op,
                lhs: (string(&src[0])?, src[0].clone()),
                rhs: (string(&src[1])?, src[1].clone()),
            },
            kernreq,
        ))
    }
}

struct StringCompareFrame {
    op: CmpOp,
    lhs: (FixedString, DType),
    rhs: (FixedString, DType),
}

/// Decodes one string element; undecodable data is an [`Error::InvalidValue`].
///
/// # Safety
///
/// `data` must point to one element of `string`.
unsafe fn read_text((string, tp): &(FixedString, DType), data: *const u8) -> Result<String> {
    // SAFETY: guaranteed by the caller.
    unsafe { string.read(data, false) }.ok_or_else(|| Error::InvalidValue {
        // SAFETY: as above.
        value: unsafe { string.read(data, true) }.unwrap_or_default(),
        dst: tp.clone(),
    })
}

impl KernelFrame for StringCompareFrame {
    unsafe fn single(&mut self, _: Children<'_>, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        // SAFETY: the caller passes one element of each string type and an aligned `i32`.
        unsafe {
            let a = read_text(&self.lhs, src[0])?;
            let b = read_text(&self.rhs, src[1])?;
            core::ptr::write(dst.cast::<i32>(), self.op.holds(Some(a.cmp(&b))) as i32);
        }
        Ok(())
    }
}

/// `({...}, {...}) -> int32`: structs with the same field names, compared field by field.
#[derive(Debug)]
struct StructEquality {
    negate: bool,
    proto: FuncProto,
}

impl StructEquality {
    fn fields<'a>(&self, src: &'a [DType]) -> Result<(&'a StructType, &'a StructType)> {
        let mismatch = || Error::SignatureMismatch {
            proto: self.proto.to_string(),
            operands: src.to_vec(),
        };
        check_arity(self.name(), &self.proto, src)?;
        let (Some(a), Some(b)) = (src[0].downcast::<StructType>(), src[1].downcast::<StructType>())
        else {
            return Err(mismatch());
        };
        let equal = equal()?;
        let same_layout = a.fields().len() == b.fields().len()
            && a.fields().iter().zip(b.fields()).all(|(fa, fb)| {
                fa.name == fb.name
                    && equal
                        .resolve(&[fa.tp.clone(), fb.tp.clone()])
                        .is_ok_and(|tp| tp == DType::INT32)
            });
        if !same_layout {
            return Err(mismatch());
        }
        Ok((a, b))
    }
}

impl BaseCallable for StructEquality {
    fn name(&self) -> &str {
        if self.negate { "not_equal" } else { "equal" }
    }

    fn proto(&self) -> &FuncProto {
        &self.proto
    }

    fn resolve(&self, src: &[DType]) -> Result<DType> {
        self.fields(src)?;
        Ok(DType::INT32)
    }

    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        _dst: &DType,
        _dst_meta: &[MetaSlot],
        src: &[DType],
        src_meta: &[&[MetaSlot]],
        kernreq: KernelRequest,
    ) -> Result<usize> {
        let (a, b) = self.fields(src)?;
        let equal = equal()?;
        let root = ckb.emplace(
            StructEqualityFrame {
                negate: self.negate,
                fields: Vec::new(),
            },
            kernreq,
        );
        let mut fields = Vec::with_capacity(a.fields().len());
        for (fa, fb) in a.fields().iter().zip(b.fields()) {
            let meta_a = &src_meta[0][fa.meta_offset..];
            let meta_b = &src_meta[1][fb.meta_offset..];
            let off = equal.instantiate(
                ckb,
                &DType::INT32,
                &[],
                &[fa.tp.clone(), fb.tp.clone()],
                &[meta_a, meta_b],
                KernelRequest::Single,
            )?;
            fields.push((fa.offset, fb.offset, off - root));
        }
        ckb.frame_mut::<StructEqualityFrame>(root).fields = fields;
        Ok(root)
    }
}

struct StructEqualityFrame {
    negate: bool,
    fields: Vec<(usize, usize, usize)>,
}

impl KernelFrame for StructEqualityFrame {
    unsafe fn single(
        &mut self,
        mut children: Children<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> Result<()> {
        let mut all = true;
        for &(a, b, rel) in &self.fields {
            let mut eq = 0i32;
            // SAFETY: the field offsets come from the struct layouts the kernel was built for.
            unsafe {
                children.single(
                    rel,
                    (&mut eq as *mut i32).cast(),
                    &[src[0].wrapping_add(a), src[1].wrapping_add(b)],
                )?;
            }
            if eq == 0 {
                all = false;
                break;
            }
        }
        // SAFETY: the caller passes an aligned `i32`.
        unsafe { core::ptr::write(dst.cast::<i32>(), (all != self.negate) as i32) };
        Ok(())
    }
}

fn build(op: CmpOp) -> Result<Callable> {
    let numeric = &TypeId::BUILTINS[..TypeId::BUILTINS.len() - 2];
    let operands: &[TypeId] = if op.is_equality() {
        &TypeId::BUILTINS
    } else {
        numeric
    };
    let visitor = BuiltinComparison(op);
    let mut overloads: Vec<Callable> = operands
        .iter()
        .flat_map(|&a| operands.iter().map(move |&b| (a, b)))
        .filter_map(|(a, b)| visit_builtin_pair(a, b, &visitor))
        .collect();

    let any_string = KindPattern::make(TypeId::FixedString);
    overloads.push(Arc::new(StringComparison {
        op,
        proto: FuncProto::new(vec![any_string.clone(), any_string], DType::INT32),
    }));
    if op.is_equality() {
        overloads.push(Arc::new(StructEquality {
            negate: op == CmpOp::NotEqual,
            proto: FuncProto::new(vec![StructPattern::make(), StructPattern::make()], DType::INT32),
        }));
    }
    Multidispatch::make(op.name(), FuncProto::parse("(Any, Any) -> Any")?, overloads)
}

fn cached(cell: &'static OnceLock<Callable>, op: CmpOp) -> Result<Callable> {
    if let Some(f) = cell.get() {
        return Ok(f.clone());
    }
    let f = build(op)?;
    Ok(cell.get_or_init(|| f).clone())
}

/// The comparison callable for `op`.
pub fn comparison(op: CmpOp) -> Result<Callable> {
    static TABLES: [OnceLock<Callable>; 6] = [const { OnceLock::new() }; 6];
    let idx = CmpOp::ALL.iter().position(|&o| o == op).unwrap_or_default();
    cached(&TABLES[idx], op)
}

pub fn less() -> Result<Callable> {
    comparison(CmpOp::Less)
}

pub fn less_equal() -> Result<Callable> {
    comparison(CmpOp::LessEqual)
}

pub fn equal() -> Result<Callable> {
    comparison(CmpOp::Equal)
}

pub fn not_equal() -> Result<Callable> {
    comparison(CmpOp::NotEqual)
}

pub fn greater_equal() -> Result<Callable> {
    comparison(CmpOp::GreaterEqual)
}

pub fn greater() -> Result<Callable> {
    comparison(CmpOp::Greater)
}
