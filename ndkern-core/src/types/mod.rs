//! Runtime type descriptors.
//!
//! A [`DType`] describes the bytes of one array element: its size and alignment, the arrmeta it
//! needs, and how to build kernels that read or write it. Builtin scalars are plain tags; every
//! other type is an immutable [`BaseType`] object shared through an `Arc`.

use core::any::Any;
use core::fmt;
use core::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::arrmeta::{Arrmeta, MetaSlot};
use crate::assign::ErrorMode;
use crate::kernel::{KernelBuilder, KernelRequest};
use crate::{Error, Result};

mod builtin;
mod bytes;
mod dim;
mod expr;
mod option;
pub mod parse;
mod pattern;
mod pointer;
mod promote;
mod proto;
mod scalar;
pub(crate) mod string;
mod structs;
mod symbolic;

pub use builtin::{BuiltinInfo, builtin_info, builtin_lossless};
pub use bytes::FixedBytes;
pub use dim::FixedDim;
pub use expr::{Convert, View};
pub use option::OptionType;
pub use pattern::{Binding, TypeVars};
pub use pointer::PointerType;
pub use promote::promote_types;
pub use proto::FuncProto;
pub use scalar::{BuiltinScalar, Complex32, Complex64, Float16, Scalar};
pub use string::{Encoding, FixedString};
pub use structs::{Field, StructType};
pub use symbolic::{AnyType, EllipsisDim, KindPattern, StructPattern, SymbolicDim, TypeVar, TypeVarDim};

/// Tag identifying a type constructor.
///
/// Two dtypes with the same tag may still differ in their parameters (e.g. `fixed_string[4]` and
/// `fixed_string[8]`); the builtin scalars are fully identified by their tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeId {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
    Complex64,
    Complex128,
    FixedBytes,
    FixedString,
    Option,
    Struct,
    FixedDim,
    Pointer,
    View,
    Convert,
    Any,
    TypeVar,
    SymbolicDim,
    TypeVarDim,
    EllipsisDim,
    KindPattern,
    StructPattern,
}

impl TypeId {
    /// Every builtin scalar tag, in promotion order.
    pub const BUILTINS: [TypeId; 14] = [
        TypeId::Bool,
        TypeId::Int8,
        TypeId::Int16,
        TypeId::Int32,
        TypeId::Int64,
        TypeId::UInt8,
        TypeId::UInt16,
        TypeId::UInt32,
        TypeId::UInt64,
        TypeId::Float16,
        TypeId::Float32,
        TypeId::Float64,
        TypeId::Complex64,
        TypeId::Complex128,
    ];

    pub const fn is_builtin(self) -> bool {
        (self as u8) <= (TypeId::Complex128 as u8)
    }
}

/// Coarse classification of a type, used to look up converters between different families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Bool,
    Int,
    UInt,
    Real,
    Complex,
    Bytes,
    String,
    Option,
    Struct,
    Pointer,
    Expression,
    Dimension,
    Symbolic,
}

impl Kind {
    /// Whether the kind is one of the builtin numeric families (including bool).
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Kind::Bool | Kind::Int | Kind::UInt | Kind::Real | Kind::Complex
        )
    }
}

/// Bit set of type properties.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeFlags(u32);

impl TypeFlags {
    pub const NONE: TypeFlags = TypeFlags(0);
    /// A builtin scalar.
    pub const BUILTIN: TypeFlags = TypeFlags(1);
    /// Values must be converted before their bytes can be read.
    pub const EXPRESSION: TypeFlags = TypeFlags(1 << 1);
    /// A pattern; no data can have this type.
    pub const SYMBOLIC: TypeFlags = TypeFlags(1 << 2);
    /// Arrmeta holds memory block references.
    pub const BLOCKREF: TypeFlags = TypeFlags(1 << 3);
    /// A dimension layer.
    pub const DIM: TypeFlags = TypeFlags(1 << 4);

    pub const fn contains(self, other: TypeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: TypeFlags) -> TypeFlags {
        TypeFlags(self.0 | other.0)
    }

    /// Flags a compound type inherits from a child.
    pub const fn inherited(self) -> TypeFlags {
        TypeFlags(self.0 & (Self::SYMBOLIC.0 | Self::BLOCKREF.0))
    }
}

impl core::ops::BitOr for TypeFlags {
    type Output = TypeFlags;
    fn bitor(self, rhs: TypeFlags) -> TypeFlags {
        self.union(rhs)
    }
}

impl fmt::Debug for TypeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::BUILTIN, "BUILTIN"),
            (Self::EXPRESSION, "EXPRESSION"),
            (Self::SYMBOLIC, "SYMBOLIC"),
            (Self::BLOCKREF, "BLOCKREF"),
            (Self::DIM, "DIM"),
        ];
        let set: Vec<_> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, n)| *n)
            .collect();
        write!(f, "TypeFlags({})", set.join(" | "))
    }
}

/// Capability contract of a non-builtin type.
///
/// Implementors are immutable once constructed. Every method receives its own arrmeta slice
/// starting at the slots it owns; a layer with children forwards the slots after its own.
pub trait BaseType: Any + Send + Sync + fmt::Debug {
    fn id(&self) -> TypeId;

    fn kind(&self) -> Kind;

    fn data_size(&self) -> usize;

    fn data_alignment(&self) -> usize;

    fn flags(&self) -> TypeFlags;

    /// Number of arrmeta slots this type and its children occupy.
    fn meta_slots(&self) -> usize {
        0
    }

    /// Writes the type expression, in the syntax accepted by [`parse::parse_type`].
    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;

    /// Structural equality with another type object.
    fn eq_type(&self, other: &dyn BaseType) -> bool;

    /// Element type of a dimension layer.
    fn element_type(&self) -> Option<&DType> {
        None
    }

    /// Fixed length of a dimension layer.
    fn dim_size(&self) -> Option<usize> {
        None
    }

    /// Type seen by readers of an expression type.
    fn value_type(&self) -> Option<&DType> {
        None
    }

    /// Type the bytes of an expression type are stored as.
    fn operand_type(&self) -> Option<&DType> {
        None
    }

    /// Appends exactly `meta_slots()` default slots.
    fn arrmeta_default(&self, _out: &mut Arrmeta) -> Result<()> {
        Ok(())
    }

    /// Validates the slots owned by this type and its children.
    fn check_arrmeta(&self, _meta: &[MetaSlot]) -> Result<()> {
        Ok(())
    }

    /// Writes a readable rendition of one element.
    ///
    /// # Safety
    ///
    /// `data` must point to a valid element of this type described by `meta`.
    unsafe fn print_data(
        &self,
        out: &mut dyn fmt::Write,
        _meta: &[MetaSlot],
        _data: *const u8,
    ) -> fmt::Result {
        out.write_str("<opaque>")
    }

    /// Whether every value of `src` survives assignment to `dst` unchanged.
    ///
    /// Called with `self` being either `dst` or `src`.
    fn is_lossless_assignment(&self, _dst: &DType, _src: &DType) -> bool {
        false
    }

    /// Builds an assignment kernel when this type knows how to; `Ok(None)` declines without
    /// placing any frame.
    fn make_assignment_kernel(
        &self,
        _ckb: &mut KernelBuilder,
        _dst: &DType,
        _dst_meta: &[MetaSlot],
        _src: &DType,
        _src_meta: &[MetaSlot],
        _kernreq: KernelRequest,
        _errmode: ErrorMode,
    ) -> Result<Option<usize>> {
        Ok(None)
    }

    /// Kernel reading the operand bytes and writing the value type (with default arrmeta).
    fn make_operand_to_value_kernel(
        &self,
        _ckb: &mut KernelBuilder,
        _value_meta: &[MetaSlot],
        _operand_meta: &[MetaSlot],
        _kernreq: KernelRequest,
    ) -> Result<usize> {
        Err(Error::Unsupported(
            "type is not an expression type".to_string(),
        ))
    }

    /// Kernel reading the value type and writing the operand bytes.
    fn make_value_to_operand_kernel(
        &self,
        _ckb: &mut KernelBuilder,
        _operand_meta: &[MetaSlot],
        _value_meta: &[MetaSlot],
        _kernreq: KernelRequest,
    ) -> Result<usize> {
        Err(Error::Unsupported(
            "type is not an expression type".to_string(),
        ))
    }

    /// Pattern matching of `this` (which wraps `self`) against a concrete type.
    fn matches(&self, this: &DType, candidate: &DType, _vars: &mut TypeVars) -> bool {
        this == candidate
    }

    /// Replaces bound type variables. With `concrete`, leftover patterns are an error.
    fn substitute(&self, this: &DType, _vars: &TypeVars, concrete: bool) -> Result<DType> {
        if concrete && this.is_symbolic() {
            return Err(Error::Unsupported(format!("{this} is not concrete")));
        }
        Ok(this.clone())
    }
}

/// A runtime element type.
#[derive(Clone)]
pub enum DType {
    Builtin(TypeId),
    Extended(Arc<dyn BaseType>),
}

impl DType {
    pub const BOOL: DType = DType::Builtin(TypeId::Bool);
    pub const INT8: DType = DType::Builtin(TypeId::Int8);
    pub const INT16: DType = DType::Builtin(TypeId::Int16);
    pub const INT32: DType = DType::Builtin(TypeId::Int32);
    pub const INT64: DType = DType::Builtin(TypeId::Int64);
    pub const UINT8: DType = DType::Builtin(TypeId::UInt8);
    pub const UINT16: DType = DType::Builtin(TypeId::UInt16);
    pub const UINT32: DType = DType::Builtin(TypeId::UInt32);
    pub const UINT64: DType = DType::Builtin(TypeId::UInt64);
    pub const FLOAT16: DType = DType::Builtin(TypeId::Float16);
    pub const FLOAT32: DType = DType::Builtin(TypeId::Float32);
    pub const FLOAT64: DType = DType::Builtin(TypeId::Float64);
    pub const COMPLEX64: DType = DType::Builtin(TypeId::Complex64);
    pub const COMPLEX128: DType = DType::Builtin(TypeId::Complex128);

    /// The builtin dtype with tag `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a builtin tag.
    pub fn builtin(id: TypeId) -> DType {
        assert!(id.is_builtin(), "{id:?} is not a builtin type");
        DType::Builtin(id)
    }

    /// The builtin dtype of a Rust scalar.
    pub fn of<T: BuiltinScalar>() -> DType {
        DType::Builtin(T::TYPE_ID)
    }

    pub fn new(tp: impl BaseType) -> DType {
        DType::Extended(Arc::new(tp))
    }

    pub fn id(&self) -> TypeId {
        match self {
            DType::Builtin(id) => *id,
            DType::Extended(t) => t.id(),
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            DType::Builtin(id) => builtin_info(*id).kind,
            DType::Extended(t) => t.kind(),
        }
    }

    pub fn data_size(&self) -> usize {
        match self {
            DType::Builtin(id) => builtin_info(*id).size,
            DType::Extended(t) => t.data_size(),
        }
    }

    pub fn data_alignment(&self) -> usize {
        match self {
            DType::Builtin(id) => builtin_info(*id).align,
            DType::Extended(t) => t.data_alignment(),
        }
    }

    pub fn flags(&self) -> TypeFlags {
        match self {
            DType::Builtin(_) => TypeFlags::BUILTIN,
            DType::Extended(t) => t.flags(),
        }
    }

    pub fn meta_slots(&self) -> usize {
        match self {
            DType::Builtin(_) => 0,
            DType::Extended(t) => t.meta_slots(),
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, DType::Builtin(_))
    }

    pub fn is_expression(&self) -> bool {
        self.flags().contains(TypeFlags::EXPRESSION)
    }

    pub fn is_symbolic(&self) -> bool {
        self.flags().contains(TypeFlags::SYMBOLIC)
    }

    pub fn is_dim(&self) -> bool {
        self.flags().contains(TypeFlags::DIM)
    }

    /// Fixed-width data needing no arrmeta and no conversion: copying its bytes copies the value.
    pub fn is_pod(&self) -> bool {
        !self.flags().contains(TypeFlags::EXPRESSION)
            && !self.flags().contains(TypeFlags::SYMBOLIC)
            && !self.flags().contains(TypeFlags::BLOCKREF)
            && !self.flags().contains(TypeFlags::DIM)
            && self.meta_slots() == 0
    }

    /// The type object of a non-builtin type.
    pub fn extended(&self) -> Option<&dyn BaseType> {
        match self {
            DType::Builtin(_) => None,
            DType::Extended(t) => Some(&**t),
        }
    }

    /// Concrete type object, if this is an extended type of type `T`.
    pub fn downcast<T: BaseType>(&self) -> Option<&T> {
        let any: &dyn Any = self.extended()?;
        any.downcast_ref::<T>()
    }

    /// The type readers see; `self` for non-expression types.
    pub fn value_type(&self) -> &DType {
        self.extended()
            .and_then(|t| t.value_type())
            .unwrap_or(self)
    }

    /// The type the bytes are stored as, one level down; `self` for non-expression types.
    pub fn operand_type(&self) -> &DType {
        self.extended()
            .and_then(|t| t.operand_type())
            .unwrap_or(self)
    }

    /// The innermost operand type.
    pub fn storage_type(&self) -> &DType {
        let mut tp = self;
        while tp.is_expression() {
            let next = tp.operand_type();
            if next == tp {
                break;
            }
            tp = next;
        }
        tp
    }

    /// Element type of a dimension layer.
    pub fn element_type(&self) -> Option<&DType> {
        self.extended().and_then(|t| t.element_type())
    }

    /// Number of leading dimension layers.
    pub fn ndim(&self) -> usize {
        let mut n = 0;
        let mut tp = self;
        while let Some(el) = tp.element_type() {
            n += 1;
            tp = el;
        }
        n
    }

    /// Type left after stripping `n` leading dimension layers.
    pub fn strip_dims(&self, n: usize) -> Option<&DType> {
        let mut tp = self;
        for _ in 0..n {
            tp = tp.element_type()?;
        }
        Some(tp)
    }

    /// The type after removing every leading dimension layer.
    pub fn dtype(&self) -> &DType {
        let mut tp = self;
        while let Some(el) = tp.element_type() {
            tp = el;
        }
        tp
    }

    /// Sizes of the leading fixed dimensions.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = Vec::new();
        let mut tp = self;
        while let Some(el) = tp.element_type() {
            shape.push(tp.extended().and_then(|t| t.dim_size()).unwrap_or(0));
            tp = el;
        }
        shape
    }

    /// Default (C-contiguous) arrmeta for this type.
    pub fn arrmeta_default(&self) -> Result<Arrmeta> {
        let mut out = Arrmeta::with_capacity(self.meta_slots());
        if let DType::Extended(t) = self {
            t.arrmeta_default(&mut out)?;
        }
        debug_assert_eq!(out.len(), self.meta_slots());
        Ok(out)
    }

    /// Validates an arrmeta against this type.
    pub fn check_arrmeta(&self, meta: &[MetaSlot]) -> Result<()> {
        if meta.len() < self.meta_slots() {
            return Err(Error::Shape(format!(
                "{self} needs {} arrmeta slots, got {}",
                self.meta_slots(),
                meta.len()
            )));
        }
        match self {
            DType::Builtin(_) => Ok(()),
            DType::Extended(t) => t.check_arrmeta(meta),
        }
    }

    /// Renders one element.
    ///
    /// # Safety
    ///
    /// `data` must point to a valid element of this type described by `meta`.
    pub unsafe fn format_data(&self, meta: &[MetaSlot], data: *const u8) -> String {
        let mut out = String::new();
        // SAFETY: forwarded from the caller.
        let _ = unsafe { self.print_data(&mut out, meta, data) };
        out
    }

    /// # Safety
    ///
    /// Same as [`DType::format_data`].
    pub unsafe fn print_data(
        &self,
        out: &mut dyn fmt::Write,
        meta: &[MetaSlot],
        data: *const u8,
    ) -> fmt::Result {
        match self {
            // SAFETY: forwarded from the caller.
            DType::Builtin(id) => unsafe { scalar::print_builtin(*id, out, data) },
            DType::Extended(t) => unsafe { t.print_data(out, meta, data) },
        }
    }

    /// Whether `self`, as a pattern, matches the concrete type `candidate`, binding variables.
    pub fn matches(&self, candidate: &DType, vars: &mut TypeVars) -> bool {
        match self {
            DType::Builtin(_) => self == candidate,
            DType::Extended(t) => t.matches(self, candidate, vars),
        }
    }

    /// Replaces bound type variables.
    pub fn substitute(&self, vars: &TypeVars, concrete: bool) -> Result<DType> {
        match self {
            DType::Builtin(_) => Ok(self.clone()),
            DType::Extended(t) => t.substitute(self, vars, concrete),
        }
    }

    /// Parses a type expression.
    pub fn parse(src: &str) -> Result<DType> {
        parse::parse_type(src)
    }
}

impl PartialEq for DType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DType::Builtin(a), DType::Builtin(b)) => a == b,
            (DType::Extended(a), DType::Extended(b)) => Arc::ptr_eq(a, b) || a.eq_type(&**b),
            _ => false,
        }
    }
}

impl Eq for DType {}

impl Hash for DType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
        self.data_size().hash(state);
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Builtin(id) => f.write_str(builtin_info(*id).name),
            DType::Extended(t) => t.print_type(f),
        }
    }
}

impl fmt::Debug for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DType({self})")
    }
}

impl From<TypeId> for DType {
    fn from(id: TypeId) -> Self {
        DType::builtin(id)
    }
}

impl core::str::FromStr for DType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        parse::parse_type(s)
    }
}

/// Downcasts another type object for `eq_type` implementations.
pub(crate) fn same_as<T: BaseType>(other: &dyn BaseType) -> Option<&T> {
    let any: &dyn Any = other;
    any.downcast_ref::<T>()
}
