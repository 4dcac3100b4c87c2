use core::ptr;

use crate::Result;
use crate::kernel::{Children, KernelBuilder, KernelFrame, KernelRequest};

/// Copies `size` bytes per element.
pub struct ByteCopy {
    size: usize,
    contiguous: bool,
}

impl ByteCopy {
    pub fn new(size: usize, kernreq: KernelRequest) -> Self {
        Self {
            size,
            contiguous: kernreq == KernelRequest::Contiguous,
        }
    }
}

pub(crate) fn make_byte_copy(ckb: &mut KernelBuilder, size: usize, kernreq: KernelRequest) -> usize {
    ckb.emplace(ByteCopy::new(size, kernreq), kernreq)
}

impl KernelFrame for ByteCopy {
    unsafe fn single(&mut self, _: Children<'_>, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        // SAFETY: both elements are `size` bytes; the caller guarantees validity.
        unsafe { ptr::copy(src[0], dst, self.size) };
        Ok(())
    }

    unsafe fn strided(
        &mut self,
        _: Children<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> Result<()> {
        let size = self.size as isize;
        if self.contiguous || (dst_stride == size && src_stride[0] == size) {
            // SAFETY: a contiguous run of `count` elements on both sides.
            unsafe { ptr::copy(src[0], dst, self.size * count) };
            return Ok(());
        }
        let (mut d, mut s) = (dst, src[0]);
        for _ in 0..count {
            // SAFETY: as in `single`.
            unsafe { ptr::copy(s, d, self.size) };
            d = d.wrapping_offset(dst_stride);
            s = s.wrapping_offset(src_stride[0]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strided_copy_with_broadcast_source() -> anyhow::Result<()> {
        let mut ckb = KernelBuilder::new();
        make_byte_copy(&mut ckb, 2, KernelRequest::Strided);
        let mut k = ckb.finalize()?;
        let src = [7u16];
        let mut dst = [0u16; 5];
        unsafe { k.strided(dst.as_mut_ptr().cast(), 2, &[src.as_ptr().cast()], &[0], 5)? };
        assert_eq!(dst, [7; 5]);
        Ok(())
    }

    #[test]
    fn contiguous_copy() -> anyhow::Result<()> {
        let mut ckb = KernelBuilder::new();
        make_byte_copy(&mut ckb, 4, KernelRequest::Contiguous);
        let mut k = ckb.finalize()?;
        let src = [1i32, 2, 3];
        let mut dst = [0i32; 3];
        unsafe { k.strided(dst.as_mut_ptr().cast(), 4, &[src.as_ptr().cast()], &[4], 3)? };
        assert_eq!(dst, src);
        Ok(())
    }
}
