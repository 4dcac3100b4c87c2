//! Expression types whose stored bytes differ from the values readers see.

use core::fmt;

use super::{BaseType, DType, FixedBytes, Kind, TypeFlags, TypeId, TypeVars, same_as};
use crate::arrmeta::MetaSlot;
use crate::assign::{ErrorMode, make_assignment_kernel, make_byte_copy};
use crate::kernel::{KernelBuilder, KernelRequest};
use crate::memblock::AlignedBuf;
use crate::{Error, Result};

/// Prints an expression element by converting it into its value type first.
unsafe fn print_as_value(
    ext: &dyn BaseType,
    value: &DType,
    out: &mut dyn fmt::Write,
    meta: &[MetaSlot],
    data: *const u8,
) -> fmt::Result {
    let render = || -> Result<String> {
        let value_meta = value.arrmeta_default()?;
        let mut ckb = KernelBuilder::new();
        ext.make_operand_to_value_kernel(&mut ckb, &value_meta, meta, KernelRequest::Single)?;
        let mut kernel = ckb.finalize()?;
        let mut tmp = AlignedBuf::new(value.data_size());
        // SAFETY: `tmp` holds one aligned value element; `data` is forwarded from the caller.
        unsafe {
            kernel.single(tmp.as_mut_ptr(), &[data])?;
            Ok(value.format_data(&value_meta, tmp.as_mut_ptr().cast_const()))
        }
    };
    match render() {
        Ok(text) => out.write_str(&text),
        Err(_) => out.write_str("<error>"),
    }
}

/// `view[V, O]`: the bytes of an `O` reinterpreted as a `V` of the same size.
#[derive(Debug)]
pub struct View {
    value: DType,
    operand: DType,
}

impl View {
    pub fn new(value: DType, operand: DType) -> Result<Self> {
        if value.data_size() != operand.data_size() {
            return Err(Error::Unsupported(format!(
                "cannot view {operand} ({} bytes) as {value} ({} bytes)",
                operand.data_size(),
                value.data_size()
            )));
        }
        if value.meta_slots() != 0 || operand.meta_slots() != 0 || operand.is_expression() {
            return Err(Error::Unsupported(format!(
                "view[{value}, {operand}] needs plain data on both sides"
            )));
        }
        Ok(Self { value, operand })
    }

    pub fn make(value: DType, operand: DType) -> Result<DType> {
        Ok(DType::new(Self::new(value, operand)?))
    }

    /// `unaligned[T]`: `T` stored without alignment. Types aligned to one byte are returned as is.
    pub fn unaligned(tp: DType) -> Result<DType> {
        if tp.data_alignment() == 1 {
            return Ok(tp);
        }
        let bytes = FixedBytes::make(tp.data_size(), 1)?;
        View::make(tp, bytes)
    }
}

impl BaseType for View {
    fn id(&self) -> TypeId {
        TypeId::View
    }

    fn kind(&self) -> Kind {
        Kind::Expression
    }

    fn data_size(&self) -> usize {
        self.operand.data_size()
    }

    fn data_alignment(&self) -> usize {
        self.operand.data_alignment()
    }

    fn flags(&self) -> TypeFlags {
        TypeFlags::EXPRESSION | self.value.flags().inherited() | self.operand.flags().inherited()
    }

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand.downcast::<FixedBytes>() {
            Some(_) if self.operand.data_alignment() == 1 => write!(f, "unaligned[{}]", self.value),
            _ => write!(f, "view[{}, {}]", self.value, self.operand),
        }
    }

    fn eq_type(&self, other: &dyn BaseType) -> bool {
        same_as::<Self>(other).is_some_and(|o| o.value == self.value && o.operand == self.operand)
    }

    fn value_type(&self) -> Option<&DType> {
        Some(&self.value)
    }

    fn operand_type(&self) -> Option<&DType> {
        Some(&self.operand)
    }

    unsafe fn print_data(
        &self,
        out: &mut dyn fmt::Write,
        meta: &[MetaSlot],
        data: *const u8,
    ) -> fmt::Result {
        // SAFETY: forwarded from the caller.
        unsafe { print_as_value(self, &self.value, out, meta, data) }
    }

    fn make_operand_to_value_kernel(
        &self,
        ckb: &mut KernelBuilder,
        _value_meta: &[MetaSlot],
        _operand_meta: &[MetaSlot],
        kernreq: KernelRequest,
    ) -> Result<usize> {
        Ok(make_byte_copy(ckb, self.value.data_size(), kernreq))
    }

    fn make_value_to_operand_kernel(
        &self,
        ckb: &mut KernelBuilder,
        _operand_meta: &[MetaSlot],
        _value_meta: &[MetaSlot],
        kernreq: KernelRequest,
    ) -> Result<usize> {
        Ok(make_byte_copy(ckb, self.value.data_size(), kernreq))
    }

    fn matches(&self, _this: &DType, candidate: &DType, vars: &mut TypeVars) -> bool {
        candidate
            .downcast::<View>()
            .is_some_and(|c| self.value.matches(&c.value, vars) && self.operand.matches(&c.operand, vars))
    }

    fn substitute(&self, _this: &DType, vars: &TypeVars, concrete: bool) -> Result<DType> {
        View::make(
            self.value.substitute(vars, concrete)?,
            self.operand.substitute(vars, concrete)?,
        )
    }
}

/// `convert[V, O, 'mode']`: stored as `O`, read and written as `V` under its own error mode.
#[derive(Debug)]
pub struct Convert {
    value: DType,
    operand: DType,
    errmode: ErrorMode,
}

impl Convert {
    pub fn new(value: DType, operand: DType, errmode: ErrorMode) -> Self {
        Self {
            value,
            operand,
            errmode,
        }
    }

    pub fn make(value: DType, operand: DType, errmode: ErrorMode) -> DType {
        DType::new(Self::new(value, operand, errmode))
    }

    pub fn errmode(&self) -> ErrorMode {
        self.errmode
    }
}

impl BaseType for Convert {
    fn id(&self) -> TypeId {
        TypeId::Convert
    }

    fn kind(&self) -> Kind {
        Kind::Expression
    }

    fn data_size(&self) -> usize {
        self.operand.data_size()
    }

    fn data_alignment(&self) -> usize {
        self.operand.data_alignment()
    }

    fn flags(&self) -> TypeFlags {
        TypeFlags::EXPRESSION | self.value.flags().inherited() | self.operand.flags().inherited()
    }

    fn meta_slots(&self) -> usize {
        self.operand.meta_slots()
    }

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "convert[{}, {}", self.value, self.operand)?;
        if self.errmode != ErrorMode::Fractional {
            write!(f, ", '{}'", self.errmode)?;
        }
        f.write_str("]")
    }

    fn eq_type(&self, other: &dyn BaseType) -> bool {
        same_as::<Self>(other).is_some_and(|o| {
            o.value == self.value && o.operand == self.operand && o.errmode == self.errmode
        })
    }

    fn value_type(&self) -> Option<&DType> {
        Some(&self.value)
    }

    fn operand_type(&self) -> Option<&DType> {
        Some(&self.operand)
    }

    fn arrmeta_default(&self, out: &mut crate::arrmeta::Arrmeta) -> Result<()> {
        out.extend(self.operand.arrmeta_default()?);
        Ok(())
    }

    fn check_arrmeta(&self, meta: &[MetaSlot]) -> Result<()> {
        self.operand.check_arrmeta(meta)
    }

    unsafe fn print_data(
        &self,
        out: &mut dyn fmt::Write,
        meta: &[MetaSlot],
        data: *const u8,
    ) -> fmt::Result {
        // SAFETY: forwarded from the caller.
        unsafe { print_as_value(self, &self.value, out, meta, data) }
    }

    fn make_operand_to_value_kernel(
        &self,
        ckb: &mut KernelBuilder,
        value_meta: &[MetaSlot],
        operand_meta: &[MetaSlot],
        kernreq: KernelRequest,
    ) -> Result<usize> {
        make_assignment_kernel(
            ckb,
            &self.value,
            value_meta,
            &self.operand,
            operand_meta,
            kernreq,
            self.errmode,
        )
    }

    fn make_value_to_operand_kernel(
        &self,
        ckb: &mut KernelBuilder,
        operand_meta: &[MetaSlot],
        value_meta: &[MetaSlot],
        kernreq: KernelRequest,
    ) -> Result<usize> {
        make_assignment_kernel(
            ckb,
            &self.operand,
            operand_meta,
            &self.value,
            value_meta,
            kernreq,
            self.errmode,
        )
    }

    fn matches(&self, _this: &DType, candidate: &DType, vars: &mut TypeVars) -> bool {
        candidate.downcast::<Convert>().is_some_and(|c| {
            c.errmode == self.errmode
                && self.value.matches(&c.value, vars)
                && self.operand.matches(&c.operand, vars)
        })
    }

    fn substitute(&self, _this: &DType, vars: &TypeVars, concrete: bool) -> Result<DType> {
        Ok(Convert::make(
            self.value.substitute(vars, concrete)?,
            self.operand.substitute(vars, concrete)?,
            self.errmode,
        ))
    }
}
