use core::fmt;

use super::{BaseType, DType, Kind, TypeFlags, TypeId, same_as};
use crate::arrmeta::MetaSlot;
use crate::assign::ErrorMode;
use crate::kernel::{KernelBuilder, KernelRequest};
use crate::memblock::MAX_ALIGN;
use crate::{Error, Result};

/// `fixed_bytes[N, A]`: `N` opaque bytes aligned to `A`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedBytes {
    size: usize,
    align: usize,
}

impl FixedBytes {
    pub fn new(size: usize, align: usize) -> Result<Self> {
        if !align.is_power_of_two() || align > MAX_ALIGN {
            return Err(Error::Unsupported(format!(
                "fixed_bytes alignment {align} is not a power of two up to {MAX_ALIGN}"
            )));
        }
        if size % align != 0 {
            return Err(Error::Unsupported(format!(
                "fixed_bytes size {size} is not a multiple of its alignment {align}"
            )));
        }
        Ok(Self { size, align })
    }

    pub fn make(size: usize, align: usize) -> Result<DType> {
        Ok(DType::new(Self::new(size, align)?))
    }
}

impl BaseType for FixedBytes {
    fn id(&self) -> TypeId {
        TypeId::FixedBytes
    }

    fn kind(&self) -> Kind {
        Kind::Bytes
    }

    fn data_size(&self) -> usize {
        self.size
    }

    fn data_alignment(&self) -> usize {
        self.align
    }

    fn flags(&self) -> TypeFlags {
        TypeFlags::NONE
    }

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fixed_bytes[{}, {}]", self.size, self.align)
    }

    fn eq_type(&self, other: &dyn BaseType) -> bool {
        same_as::<Self>(other).is_some_and(|o| o == self)
    }

    unsafe fn print_data(
        &self,
        out: &mut dyn fmt::Write,
        _meta: &[MetaSlot],
        data: *const u8,
    ) -> fmt::Result {
        // SAFETY: the caller passes `size` readable bytes.
        let bytes = unsafe { core::slice::from_raw_parts(data, self.size) };
        out.write_str("0x")?;
        for b in bytes {
            write!(out, "{b:02x}")?;
        }
        Ok(())
    }

    fn is_lossless_assignment(&self, dst: &DType, src: &DType) -> bool {
        dst.kind() == Kind::Bytes && src.kind() == Kind::Bytes && dst.data_size() == src.data_size()
    }

    fn make_assignment_kernel(
        &self,
        ckb: &mut KernelBuilder,
        dst: &DType,
        _dst_meta: &[MetaSlot],
        src: &DType,
        _src_meta: &[MetaSlot],
        kernreq: KernelRequest,
        _errmode: ErrorMode,
    ) -> Result<Option<usize>> {
        if dst.kind() == Kind::Bytes && src.kind() == Kind::Bytes && dst.data_size() == src.data_size() {
            return Ok(Some(crate::assign::make_byte_copy(ckb, self.size, kernreq)));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::assignment_kernel;

    #[test]
    fn validates_parameters() {
        assert!(FixedBytes::new(8, 4).is_ok());
        assert!(FixedBytes::new(8, 3).is_err());
        assert!(FixedBytes::new(6, 4).is_err());
        assert!(FixedBytes::new(64, 32).is_err());
    }

    #[test]
    fn differently_aligned_bytes_copy() -> anyhow::Result<()> {
        let a = FixedBytes::make(4, 4)?;
        let b = FixedBytes::make(4, 1)?;
        assert_eq!(a.to_string(), "fixed_bytes[4, 4]");
        assert!(crate::assign::is_lossless_assignment(&a, &b));
        let mut k = assignment_kernel(&a, &[], &b, &[], KernelRequest::Single, ErrorMode::Inexact)?;
        let src = [1u8, 2, 3, 4];
        let mut dst = 0u32;
        unsafe { k.single((&mut dst as *mut u32).cast(), &[src.as_ptr()])? };
        assert_eq!(dst.to_ne_bytes(), src);
        assert_eq!(unsafe { a.format_data(&[], src.as_ptr()) }, "0x01020304");
        Ok(())
    }

    #[test]
    fn different_sizes_do_not_convert() -> anyhow::Result<()> {
        let a = FixedBytes::make(4, 1)?;
        let b = FixedBytes::make(2, 1)?;
        let err = assignment_kernel(&a, &[], &b, &[], KernelRequest::Single, ErrorMode::None).unwrap_err();
        assert!(matches!(err, Error::NoConversion { .. }));
        Ok(())
    }
}
