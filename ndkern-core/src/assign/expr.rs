//! Chaining through expression types.
//!
//! Reading an expression type converts its operand into the value type in a temporary, then
//! assigns the temporary to the destination. Writing one runs the same chain backwards.

use tracing::trace;

use super::{ErrorMode, make_assignment_kernel};
use crate::arrmeta::MetaSlot;
use crate::kernel::{Children, KernelBuilder, KernelFrame, KernelRequest};
use crate::memblock::AlignedBuf;
use crate::types::DType;
use crate::{Error, Result};

/// Elements converted per chunk on the strided path.
const CHUNK: usize = 128;

/// Two children run back to back through a temporary of `item` bytes per element.
///
/// The first child writes the temporary, the second reads it.
pub struct ChainFrame {
    item: usize,
    buf: AlignedBuf,
    second: usize,
}

impl ChainFrame {
    fn new(item: usize, kernreq: KernelRequest) -> Self {
        let n = if kernreq.is_strided() { CHUNK } else { 1 };
        Self {
            item,
            buf: AlignedBuf::new(item.max(1) * n),
            second: 0,
        }
    }
}

impl KernelFrame for ChainFrame {
    unsafe fn single(
        &mut self,
        mut children: Children<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> Result<()> {
        let tmp = self.buf.as_mut_ptr();
        // SAFETY: `tmp` holds one aligned value-type element.
        unsafe {
            children.single(1, tmp, src)?;
            children.single(self.second, dst, &[tmp.cast_const()])
        }
    }

    unsafe fn strided(
        &mut self,
        mut children: Children<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> Result<()> {
        let tmp = self.buf.as_mut_ptr();
        let item = self.item as isize;
        let (mut d, mut s) = (dst, src[0]);
        let mut done = 0;
        while done < count {
            let n = CHUNK.min(count - done);
            // SAFETY: `tmp` holds `CHUNK` elements.
            unsafe {
                children.strided(1, tmp, item, &[s], src_stride, n)?;
                children.strided(self.second, d, dst_stride, &[tmp.cast_const()], &[item], n)?;
            }
            d = d.wrapping_offset(dst_stride * n as isize);
            s = s.wrapping_offset(src_stride[0] * n as isize);
            done += n;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ChainFrame"
    }
}

fn temporary_type(tp: &DType) -> Result<DType> {
    if tp.is_symbolic() {
        return Err(Error::Unsupported(format!("no temporary for {tp}")));
    }
    Ok(tp.clone())
}

/// `dst <- value(src) <- operand(src)`.
pub(super) fn make_expr_to_value(
    ckb: &mut KernelBuilder,
    dst: &DType,
    dst_meta: &[MetaSlot],
    src: &DType,
    src_meta: &[MetaSlot],
    kernreq: KernelRequest,
    errmode: ErrorMode,
) -> Result<usize> {
    let ext = src.extended().ok_or_else(|| Error::NoConversion {
        dst: dst.clone(),
        src: src.clone(),
    })?;
    let value = temporary_type(src.value_type())?;
    let value_meta = value.arrmeta_default()?;
    trace!(%src, %value, %dst, "chaining expression source");
    let child_req = if kernreq.is_strided() {
        KernelRequest::Strided
    } else {
        KernelRequest::Single
    };
    let root = ckb.emplace(ChainFrame::new(value.data_size(), kernreq), kernreq);
    ext.make_operand_to_value_kernel(ckb, &value_meta, src_meta, child_req)?;
    let second = ckb.len() - root;
    make_assignment_kernel(ckb, dst, dst_meta, &value, &value_meta, child_req, errmode)?;
    ckb.frame_mut::<ChainFrame>(root).second = second;
    Ok(root)
}

/// `operand(dst) <- value(dst) <- src`.
pub(super) fn make_value_to_expr(
    ckb: &mut KernelBuilder,
    dst: &DType,
    dst_meta: &[MetaSlot],
    src: &DType,
    src_meta: &[MetaSlot],
    kernreq: KernelRequest,
    errmode: ErrorMode,
) -> Result<usize> {
    let ext = dst.extended().ok_or_else(|| Error::NoConversion {
        dst: dst.clone(),
        src: src.clone(),
    })?;
    let value = temporary_type(dst.value_type())?;
    let value_meta = value.arrmeta_default()?;
    trace!(%src, %value, %dst, "chaining expression destination");
    let child_req = if kernreq.is_strided() {
        KernelRequest::Strided
    } else {
        KernelRequest::Single
    };
    let root = ckb.emplace(ChainFrame::new(value.data_size(), kernreq), kernreq);
    make_assignment_kernel(ckb, &value, &value_meta, src, src_meta, child_req, errmode)?;
    let second = ckb.len() - root;
    ext.make_value_to_operand_kernel(ckb, dst_meta, &value_meta, child_req)?;
    ckb.frame_mut::<ChainFrame>(root).second = second;
    Ok(root)
}

#[cfg(test)]
mod tests {
    use crate::assign::{ErrorMode, assignment_kernel};
    use crate::kernel::KernelRequest;
    use crate::types::DType;

    #[test]
    fn reads_through_convert() -> anyhow::Result<()> {
        let src_tp = DType::parse("convert[float64, int16]")?;
        let mut k = assignment_kernel(
            &DType::FLOAT32,
            &[],
            &src_tp,
            &[],
            KernelRequest::Strided,
            ErrorMode::Fractional,
        )?;
        let src: Vec<i16> = (0..300).map(|i| i - 150).collect();
        let mut dst = vec![0f32; 300];
        unsafe { k.strided(dst.as_mut_ptr().cast(), 4, &[src.as_ptr().cast()], &[2], 300)? };
        assert!(dst.iter().zip(&src).all(|(&d, &s)| d == s as f32));
        Ok(())
    }

    #[test]
    fn writes_through_convert_with_its_own_mode() -> anyhow::Result<()> {
        let dst_tp = DType::parse("convert[float64, int8, 'overflow']")?;
        let mut k = assignment_kernel(
            &dst_tp,
            &[],
            &DType::FLOAT32,
            &[],
            KernelRequest::Single,
            ErrorMode::Inexact,
        )?;
        let mut out = 0i8;
        let v = 2.5f32;
        unsafe { k.single((&mut out as *mut i8).cast(), &[(&v as *const f32).cast()])? };
        assert_eq!(out, 2);
        let v = 300.0f32;
        assert!(unsafe { k.single((&mut out as *mut i8).cast(), &[(&v as *const f32).cast()]) }.is_err());
        Ok(())
    }

    #[test]
    fn unaligned_view_reads_packed_bytes() -> anyhow::Result<()> {
        let src_tp = DType::parse("unaligned[int32]")?;
        assert_eq!(src_tp.data_alignment(), 1);
        let mut k = assignment_kernel(
            &DType::INT64,
            &[],
            &src_tp,
            &[],
            KernelRequest::Strided,
            ErrorMode::Fractional,
        )?;
        let mut packed = vec![0u8; 1];
        for v in [10i32, -20, 30] {
            packed.extend_from_slice(&v.to_ne_bytes());
        }
        let mut out = [0i64; 3];
        unsafe { k.strided(out.as_mut_ptr().cast(), 8, &[packed[1..].as_ptr()], &[4], 3)? };
        assert_eq!(out, [10, -20, 30]);
        Ok(())
    }
}
