//! Pattern types appearing in function prototypes. No data can have these types.

use core::fmt;

use super::pattern::ANONYMOUS_ELLIPSIS;
use super::{BaseType, Binding, DType, FixedDim, Kind, TypeFlags, TypeId, TypeVars, same_as};
use crate::{Error, Result};

fn unbound(name: &str) -> Error {
    Error::UnboundTypeVar(name.to_string())
}

/// `Any`: matches every type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnyType;

impl AnyType {
    pub fn make() -> DType {
        DType::new(AnyType)
    }
}

impl BaseType for AnyType {
    fn id(&self) -> TypeId {
        TypeId::Any
    }

    fn kind(&self) -> Kind {
        Kind::Symbolic
    }

    fn data_size(&self) -> usize {
        0
    }

    fn data_alignment(&self) -> usize {
        1
    }

    fn flags(&self) -> TypeFlags {
        TypeFlags::SYMBOLIC
    }

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Any")
    }

    fn eq_type(&self, other: &dyn BaseType) -> bool {
        same_as::<Self>(other).is_some()
    }

    fn matches(&self, _this: &DType, _candidate: &DType, _vars: &mut TypeVars) -> bool {
        true
    }
}

/// A type variable such as `T`; every occurrence in a prototype binds to the same type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeVar {
    name: String,
}

impl TypeVar {
    pub fn make(name: impl Into<String>) -> DType {
        DType::new(TypeVar { name: name.into() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl BaseType for TypeVar {
    fn id(&self) -> TypeId {
        TypeId::TypeVar
    }

    fn kind(&self) -> Kind {
        Kind::Symbolic
    }

    fn data_size(&self) -> usize {
        0
    }

    fn data_alignment(&self) -> usize {
        1
    }

    fn flags(&self) -> TypeFlags {
        TypeFlags::SYMBOLIC
    }

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }

    fn eq_type(&self, other: &dyn BaseType) -> bool {
        same_as::<Self>(other).is_some_and(|o| o == self)
    }

    fn matches(&self, _this: &DType, candidate: &DType, vars: &mut TypeVars) -> bool {
        !candidate.is_dim() && vars.bind_type(&self.name, candidate)
    }

    fn substitute(&self, this: &DType, vars: &TypeVars, concrete: bool) -> Result<DType> {
        match vars.get(&self.name) {
            Some(Binding::Type(tp)) => Ok(tp.clone()),
            _ if concrete => Err(unbound(&self.name)),
            _ => Ok(this.clone()),
        }
    }
}

/// `Fixed * T`: any fixed dimension.
#[derive(Debug)]
pub struct SymbolicDim {
    element: DType,
}

impl SymbolicDim {
    pub fn make(element: DType) -> DType {
        DType::new(SymbolicDim { element })
    }
}

impl BaseType for SymbolicDim {
    fn id(&self) -> TypeId {
        TypeId::SymbolicDim
    }

    fn kind(&self) -> Kind {
        Kind::Dimension
    }

    fn data_size(&self) -> usize {
        0
    }

    fn data_alignment(&self) -> usize {
        self.element.data_alignment()
    }

    fn flags(&self) -> TypeFlags {
        TypeFlags::SYMBOLIC | TypeFlags::DIM
    }

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixed * {}", self.element)
    }

    fn eq_type(&self, other: &dyn BaseType) -> bool {
        same_as::<Self>(other).is_some_and(|o| o.element == self.element)
    }

    fn element_type(&self) -> Option<&DType> {
        Some(&self.element)
    }

    fn matches(&self, _this: &DType, candidate: &DType, vars: &mut TypeVars) -> bool {
        candidate
            .downcast::<FixedDim>()
            .is_some_and(|c| self.element.matches(c.element(), vars))
    }

    fn substitute(&self, this: &DType, vars: &TypeVars, concrete: bool) -> Result<DType> {
        if concrete {
            return Err(Error::Unsupported(format!("{this} has no concrete size")));
        }
        Ok(SymbolicDim::make(self.element.substitute(vars, false)?))
    }
}

/// `N * T`: a fixed dimension whose size binds to the variable `N`.
#[derive(Debug)]
pub struct TypeVarDim {
    name: String,
    element: DType,
}

impl TypeVarDim {
    pub fn make(name: impl Into<String>, element: DType) -> DType {
        DType::new(TypeVarDim {
            name: name.into(),
            element,
        })
    }
}

impl BaseType for TypeVarDim {
    fn id(&self) -> TypeId {
        TypeId::TypeVarDim
    }

    fn kind(&self) -> Kind {
        Kind::Dimension
    }

    fn data_size(&self) -> usize {
        0
    }

    fn data_alignment(&self) -> usize {
        self.element.data_alignment()
    }

    fn flags(&self) -> TypeFlags {
        TypeFlags::SYMBOLIC | TypeFlags::DIM
    }

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} * {}", self.name, self.element)
    }

    fn eq_type(&self, other: &dyn BaseType) -> bool {
        same_as::<Self>(other).is_some_and(|o| o.name == self.name && o.element == self.element)
    }

    fn element_type(&self) -> Option<&DType> {
        Some(&self.element)
    }

    fn matches(&self, _this: &DType, candidate: &DType, vars: &mut TypeVars) -> bool {
        candidate.downcast::<FixedDim>().is_some_and(|c| {
            vars.bind_dim(&self.name, c.size()) && self.element.matches(c.element(), vars)
        })
    }

    fn substitute(&self, this: &DType, vars: &TypeVars, concrete: bool) -> Result<DType> {
        let element = self.element.substitute(vars, concrete)?;
        match vars.get(&self.name) {
            Some(Binding::Dim(n)) => Ok(FixedDim::make(*n, element)),
            _ if concrete => Err(unbound(&self.name)),
            _ => Ok(if element == self.element {
                this.clone()
            } else {
                TypeVarDim::make(self.name.clone(), element)
            }),
        }
    }
}

/// `... * T` or `Dims... * T`: zero or more leading fixed dimensions.
///
/// Anonymous ellipses of one prototype share a binding, so their dimensions broadcast together.
#[derive(Debug)]
pub struct EllipsisDim {
    name: Option<String>,
    element: DType,
}

impl EllipsisDim {
    pub fn make(name: Option<String>, element: DType) -> DType {
        DType::new(EllipsisDim { name, element })
    }

    fn var(&self) -> &str {
        self.name.as_deref().unwrap_or(ANONYMOUS_ELLIPSIS)
    }
}

impl BaseType for EllipsisDim {
    fn id(&self) -> TypeId {
        TypeId::EllipsisDim
    }

    fn kind(&self) -> Kind {
        Kind::Dimension
    }

    fn data_size(&self) -> usize {
        0
    }

    fn data_alignment(&self) -> usize {
        self.element.data_alignment()
    }

    fn flags(&self) -> TypeFlags {
        TypeFlags::SYMBOLIC | TypeFlags::DIM
    }

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}... * {}", self.element),
            None => write!(f, "... * {}", self.element),
        }
    }

    fn eq_type(&self, other: &dyn BaseType) -> bool {
        same_as::<Self>(other).is_some_and(|o| o.name == self.name && o.element == self.element)
    }

    fn element_type(&self) -> Option<&DType> {
        Some(&self.element)
    }

    fn matches(&self, _this: &DType, candidate: &DType, vars: &mut TypeVars) -> bool {
        let want = self.element.ndim();
        let have = candidate.ndim();
        if have < want {
            return false;
        }
        let leading = &candidate.shape()[..have - want];
        let Some(rest) = candidate.strip_dims(have - want) else {
            return false;
        };
        vars.bind_dims(self.var(), leading) && self.element.matches(rest, vars)
    }

    fn substitute(&self, _this: &DType, vars: &TypeVars, concrete: bool) -> Result<DType> {
        let element = self.element.substitute(vars, concrete)?;
        match vars.get(self.var()) {
            Some(Binding::Dims(shape)) => Ok(FixedDim::make_nd(shape, element)),
            _ if concrete => Err(unbound(self.var())),
            _ => Ok(EllipsisDim::make(self.name.clone(), element)),
        }
    }
}

/// `FixedString` or `FixedBytes`: any type built by that constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindPattern {
    id: TypeId,
}

impl KindPattern {
    pub fn make(id: TypeId) -> DType {
        DType::new(KindPattern { id })
    }
}

impl BaseType for KindPattern {
    fn id(&self) -> TypeId {
        TypeId::KindPattern
    }

    fn kind(&self) -> Kind {
        Kind::Symbolic
    }

    fn data_size(&self) -> usize {
        0
    }

    fn data_alignment(&self) -> usize {
        1
    }

    fn flags(&self) -> TypeFlags {
        TypeFlags::SYMBOLIC
    }

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            TypeId::FixedString => f.write_str("FixedString"),
            TypeId::FixedBytes => f.write_str("FixedBytes"),
            other => write!(f, "{other:?}"),
        }
    }

    fn eq_type(&self, other: &dyn BaseType) -> bool {
        same_as::<Self>(other).is_some_and(|o| o == self)
    }

    fn matches(&self, _this: &DType, candidate: &DType, _vars: &mut TypeVars) -> bool {
        candidate.id() == self.id
    }
}

/// `{...}`: any struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructPattern;

impl StructPattern {
    pub fn make() -> DType {
        DType::new(StructPattern)
    }
}

impl BaseType for StructPattern {
    fn id(&self) -> TypeId {
        TypeId::StructPattern
    }

    fn kind(&self) -> Kind {
        Kind::Symbolic
    }

    fn data_size(&self) -> usize {
        0
    }

    fn data_alignment(&self) -> usize {
        1
    }

    fn flags(&self) -> TypeFlags {
        TypeFlags::SYMBOLIC
    }

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{...}")
    }

    fn eq_type(&self, other: &dyn BaseType) -> bool {
        same_as::<Self>(other).is_some()
    }

    fn matches(&self, _this: &DType, candidate: &DType, _vars: &mut TypeVars) -> bool {
        candidate.id() == TypeId::Struct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, concrete: &str, vars: &mut TypeVars) -> anyhow::Result<bool> {
        Ok(DType::parse(pattern)?.matches(&DType::parse(concrete)?, vars))
    }

    #[test]
    fn type_variables_bind_consistently() -> anyhow::Result<()> {
        let mut vars = TypeVars::new();
        assert!(matches("T", "int32", &mut vars)?);
        assert!(matches("T", "int32", &mut vars)?);
        assert!(!matches("T", "float32", &mut vars)?);
        assert!(!matches("U", "3 * int32", &mut TypeVars::new())?);
        let out = DType::parse("?T")?.substitute(&vars, true)?;
        assert_eq!(out.to_string(), "?int32");
        assert!(matches!(
            DType::parse("U")?.substitute(&vars, true),
            Err(Error::UnboundTypeVar(_))
        ));
        Ok(())
    }

    #[test]
    fn dimension_patterns() -> anyhow::Result<()> {
        let mut vars = TypeVars::new();
        assert!(matches("Fixed * int16", "7 * int16", &mut vars)?);
        assert!(!matches("Fixed * int16", "int16", &mut vars)?);
        assert!(matches("N * N * T", "3 * 3 * int8", &mut vars)?);
        assert!(!matches("N * N * T", "3 * 4 * int8", &mut TypeVars::new())?);
        assert_eq!(
            DType::parse("N * float64")?.substitute(&vars, true)?.to_string(),
            "3 * float64"
        );
        Ok(())
    }

    #[test]
    fn ellipsis_strips_leading_dims() -> anyhow::Result<()> {
        let mut vars = TypeVars::new();
        assert!(matches("... * 2 * T", "4 * 3 * 2 * float32", &mut vars)?);
        assert_eq!(vars.get("..."), Some(&Binding::Dims(vec![4, 3])));
        assert!(matches("... * T", "1 * 3 * float32", &mut vars)?);
        assert_eq!(vars.get("..."), Some(&Binding::Dims(vec![4, 3])));
        let out = DType::parse("... * int32")?.substitute(&vars, true)?;
        assert_eq!(out.to_string(), "4 * 3 * int32");

        let mut vars = TypeVars::new();
        assert!(matches("Dims... * int32", "int32", &mut vars)?);
        assert_eq!(vars.get("Dims"), Some(&Binding::Dims(vec![])));
        Ok(())
    }

    #[test]
    fn kind_and_struct_patterns() -> anyhow::Result<()> {
        let mut vars = TypeVars::new();
        assert!(matches("FixedString", "fixed_string[3, 'utf16']", &mut vars)?);
        assert!(!matches("FixedString", "fixed_bytes[4, 4]", &mut vars)?);
        assert!(matches("FixedBytes", "fixed_bytes[4, 4]", &mut vars)?);
        assert!(matches("{...}", "{a: int8}", &mut vars)?);
        assert!(!matches("{...}", "int8", &mut vars)?);
        assert!(matches("Any", "pointer[int8]", &mut vars)?);
        assert!(vars.is_empty());
        Ok(())
    }
}
