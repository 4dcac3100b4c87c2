use core::fmt;

use super::{BaseType, DType, FixedBytes, Kind, TypeFlags, TypeId, TypeVars, same_as};
use crate::arrmeta::{Arrmeta, MetaSlot};
use crate::assign::{ErrorMode, make_assignment_kernel};
use crate::kernel::{Children, KernelBuilder, KernelFrame, KernelRequest};
use crate::{Error, Result};

const ADDRESS_SIZE: usize = core::mem::size_of::<usize>();

/// `pointer[T]`: the element is an address of a `T`.
///
/// The first arrmeta slot is a [`MetaSlot::Block`] whose block keeps the targets alive and whose
/// offset is added to every stored address. Pointers can be read through but not written.
#[derive(Debug)]
pub struct PointerType {
    target: DType,
    storage: DType,
}

impl PointerType {
    pub fn new(target: DType) -> Result<Self> {
        Ok(Self {
            target,
            storage: FixedBytes::make(ADDRESS_SIZE, ADDRESS_SIZE)?,
        })
    }

    pub fn make(target: DType) -> Result<DType> {
        Ok(DType::new(Self::new(target)?))
    }

    pub fn target(&self) -> &DType {
        &self.target
    }
}

fn block_offset(meta: &[MetaSlot]) -> Result<isize> {
    match meta.first() {
        Some(MetaSlot::Block { offset, .. }) => Ok(*offset),
        _ => Err(Error::Shape("pointer arrmeta lacks its block slot".to_string())),
    }
}

impl BaseType for PointerType {
    fn id(&self) -> TypeId {
        TypeId::Pointer
    }

    fn kind(&self) -> Kind {
        Kind::Pointer
    }

    fn data_size(&self) -> usize {
        ADDRESS_SIZE
    }

    fn data_alignment(&self) -> usize {
        ADDRESS_SIZE
    }

    fn flags(&self) -> TypeFlags {
        TypeFlags::EXPRESSION | TypeFlags::BLOCKREF | self.target.flags().inherited()
    }

    fn meta_slots(&self) -> usize {
        1 + self.target.meta_slots()
    }

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pointer[{}]", self.target)
    }

    fn eq_type(&self, other: &dyn BaseType) -> bool {
        same_as::<Self>(other).is_some_and(|o| o.target == self.target)
    }

    fn value_type(&self) -> Option<&DType> {
        Some(&self.target)
    }

    fn operand_type(&self) -> Option<&DType> {
        Some(&self.storage)
    }

    fn arrmeta_default(&self, out: &mut Arrmeta) -> Result<()> {
        out.push(MetaSlot::Block {
            block: None,
            offset: 0,
        });
        out.extend(self.target.arrmeta_default()?);
        Ok(())
    }

    fn check_arrmeta(&self, meta: &[MetaSlot]) -> Result<()> {
        block_offset(meta)?;
        self.target.check_arrmeta(&meta[1..])
    }

    unsafe fn print_data(
        &self,
        out: &mut dyn fmt::Write,
        meta: &[MetaSlot],
        data: *const u8,
    ) -> fmt::Result {
        // SAFETY: the caller passes an address element.
        let addr = unsafe { core::ptr::read(data.cast::<usize>()) };
        if addr == 0 {
            return out.write_str("null");
        }
        let offset = block_offset(meta).map_err(|_| fmt::Error)?;
        let target = (addr as *const u8).wrapping_offset(offset);
        // SAFETY: non-null addresses point at live targets described by the arrmeta.
        unsafe { self.target.print_data(out, &meta[1..], target) }
    }

    fn make_operand_to_value_kernel(
        &self,
        ckb: &mut KernelBuilder,
        value_meta: &[MetaSlot],
        operand_meta: &[MetaSlot],
        kernreq: KernelRequest,
    ) -> Result<usize> {
        let offset = block_offset(operand_meta)?;
        let root = ckb.emplace(
            DerefFrame {
                offset,
                target: self.target.clone(),
            },
            kernreq,
        );
        make_assignment_kernel(
            ckb,
            &self.target,
            value_meta,
            &self.target,
            &operand_meta[1..],
            KernelRequest::Single,
            ErrorMode::None,
        )?;
        Ok(root)
    }

    fn matches(&self, _this: &DType, candidate: &DType, vars: &mut TypeVars) -> bool {
        candidate
            .downcast::<PointerType>()
            .is_some_and(|c| self.target.matches(&c.target, vars))
    }

    fn substitute(&self, _this: &DType, vars: &TypeVars, concrete: bool) -> Result<DType> {
        PointerType::make(self.target.substitute(vars, concrete)?)
    }
}

/// Follows the stored address and copies the target.
struct DerefFrame {
    offset: isize,
    target: DType,
}

impl KernelFrame for DerefFrame {
    unsafe fn single(
        &mut self,
        mut children: Children<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> Result<()> {
        // SAFETY: the caller passes an address element.
        let addr = unsafe { core::ptr::read(src[0].cast::<usize>()) };
        if addr == 0 {
            return Err(Error::InvalidValue {
                value: "null".to_string(),
                dst: self.target.clone(),
            });
        }
        let target = (addr as *const u8).wrapping_offset(self.offset);
        // SAFETY: non-null addresses point at live targets.
        unsafe { children.single(1, dst, &[target]) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::assignment_kernel;

    #[test]
    fn reads_through_addresses() -> anyhow::Result<()> {
        let tp = PointerType::make(DType::FLOAT64)?;
        assert_eq!(tp.to_string(), "pointer[float64]");
        assert!(tp.is_expression());
        assert_eq!(tp.value_type(), &DType::FLOAT64);
        let meta = tp.arrmeta_default()?;
        assert_eq!(meta.len(), 1);

        let targets = [1.25f64, -8.0];
        let addrs: Vec<usize> = targets.iter().map(|t| t as *const f64 as usize).collect();
        let mut k = assignment_kernel(&DType::FLOAT32, &[], &tp, &meta, KernelRequest::Strided, ErrorMode::Inexact)?;
        let mut out = [0f32; 2];
        unsafe { k.strided(out.as_mut_ptr().cast(), 4, &[addrs.as_ptr().cast()], &[ADDRESS_SIZE as isize], 2)? };
        assert_eq!(out, [1.25, -8.0]);
        assert_eq!(unsafe { tp.format_data(&meta, addrs.as_ptr().cast()) }, "1.25");
        Ok(())
    }

    #[test]
    fn null_and_writes_fail() -> anyhow::Result<()> {
        let tp = PointerType::make(DType::INT32)?;
        let meta = tp.arrmeta_default()?;
        let mut k = assignment_kernel(&DType::INT32, &[], &tp, &meta, KernelRequest::Single, ErrorMode::None)?;
        let null = 0usize;
        let mut out = 0i32;
        let err = unsafe { k.single((&mut out as *mut i32).cast(), &[(&null as *const usize).cast()]) }.unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
        assert!(assignment_kernel(&tp, &meta, &DType::INT32, &[], KernelRequest::Single, ErrorMode::None).is_err());
        Ok(())
    }
}
