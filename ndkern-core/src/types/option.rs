use core::fmt;

use super::{BaseType, DType, Kind, TypeFlags, TypeId, TypeVars, same_as};
use crate::arrmeta::{Arrmeta, MetaSlot};
use crate::assign::{ErrorMode, is_lossless_assignment, make_assignment_kernel};
use crate::kernel::{Children, KernelBuilder, KernelFrame, KernelRequest};
use crate::{Error, Result};

/// `?T`: a value followed by a validity byte.
#[derive(Debug)]
pub struct OptionType {
    value: DType,
}

impl OptionType {
    pub fn new(value: DType) -> Result<Self> {
        if value.is_dim() {
            return Err(Error::Unsupported(format!(
                "option of dimension type {value}"
            )));
        }
        Ok(Self { value })
    }

    pub fn make(value: DType) -> Result<DType> {
        Ok(DType::new(Self::new(value)?))
    }

    pub fn value(&self) -> &DType {
        &self.value
    }

    /// Offset of the validity byte.
    pub fn flag_offset(&self) -> usize {
        self.value.data_size()
    }
}

impl BaseType for OptionType {
    fn id(&self) -> TypeId {
        TypeId::Option
    }

    fn kind(&self) -> Kind {
        Kind::Option
    }

    fn data_size(&self) -> usize {
        (self.value.data_size() + 1).next_multiple_of(self.value.data_alignment())
    }

    fn data_alignment(&self) -> usize {
        self.value.data_alignment()
    }

    fn flags(&self) -> TypeFlags {
        self.value.flags().inherited()
    }

    fn meta_slots(&self) -> usize {
        self.value.meta_slots()
    }

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.value)
    }

    fn eq_type(&self, other: &dyn BaseType) -> bool {
        same_as::<Self>(other).is_some_and(|o| o.value == self.value)
    }

    fn arrmeta_default(&self, out: &mut Arrmeta) -> Result<()> {
        out.extend(self.value.arrmeta_default()?);
        Ok(())
    }

    fn check_arrmeta(&self, meta: &[MetaSlot]) -> Result<()> {
        self.value.check_arrmeta(meta)
    }

    unsafe fn print_data(
        &self,
        out: &mut dyn fmt::Write,
        meta: &[MetaSlot],
        data: *const u8,
    ) -> fmt::Result {
        // SAFETY: the caller passes a whole option element.
        if unsafe { *data.add(self.flag_offset()) } == 0 {
            out.write_str("NA")
        } else {
            // SAFETY: as above.
            unsafe { self.value.print_data(out, meta, data) }
        }
    }

    fn is_lossless_assignment(&self, dst: &DType, src: &DType) -> bool {
        match (dst.downcast::<OptionType>(), src.downcast::<OptionType>()) {
            (Some(d), Some(s)) => is_lossless_assignment(&d.value, &s.value),
            (Some(d), None) => is_lossless_assignment(&d.value, src),
            _ => false,
        }
    }

    fn make_assignment_kernel(
        &self,
        ckb: &mut KernelBuilder,
        dst: &DType,
        dst_meta: &[MetaSlot],
        src: &DType,
        src_meta: &[MetaSlot],
        kernreq: KernelRequest,
        errmode: ErrorMode,
    ) -> Result<Option<usize>> {
        let d = dst.downcast::<OptionType>();
        let s = src.downcast::<OptionType>();
        if d.is_none() && s.is_none() {
            return Ok(None);
        }
        let root = ckb.emplace(
            OptionFrame {
                dst_flag: d.map(OptionType::flag_offset),
                src_flag: s.map(OptionType::flag_offset),
                dst_tp: dst.clone(),
            },
            kernreq,
        );
        make_assignment_kernel(
            ckb,
            d.map_or(dst, |d| &d.value),
            dst_meta,
            s.map_or(src, |s| &s.value),
            src_meta,
            KernelRequest::Single,
            errmode,
        )?;
        Ok(Some(root))
    }

    fn matches(&self, _this: &DType, candidate: &DType, vars: &mut TypeVars) -> bool {
        candidate
            .downcast::<OptionType>()
            .is_some_and(|c| self.value.matches(&c.value, vars))
    }

    fn substitute(&self, _this: &DType, vars: &TypeVars, concrete: bool) -> Result<DType> {
        OptionType::make(self.value.substitute(vars, concrete)?)
    }
}

/// Propagates validity around a value assignment child.
struct OptionFrame {
    dst_flag: Option<usize>,
    src_flag: Option<usize>,
    dst_tp: DType,
}

impl KernelFrame for OptionFrame {
    unsafe fn single(
        &mut self,
        mut children: Children<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> Result<()> {
        // SAFETY: flag offsets lie inside the option elements the caller passes.
        unsafe {
            let valid = self.src_flag.is_none_or(|off| *src[0].add(off) != 0);
            match (valid, self.dst_flag) {
                (true, flag) => {
                    children.single(1, dst, src)?;
                    if let Some(off) = flag {
                        *dst.add(off) = 1;
                    }
                }
                (false, Some(off)) => *dst.add(off) = 0,
                (false, None) => {
                    return Err(Error::MissingValue {
                        dst: self.dst_tp.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
