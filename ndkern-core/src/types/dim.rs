use core::fmt;

use super::{BaseType, DType, Kind, TypeFlags, TypeId, TypeVars, same_as};
use crate::arrmeta::{Arrmeta, MetaSlot};
use crate::assign::{ErrorMode, make_assignment_kernel};
use crate::kernel::{DimLoopFrame, KernelBuilder, KernelRequest};
use crate::{Error, Result};

/// `N * T`: a dimension of fixed length whose stride lives in the arrmeta.
#[derive(Debug)]
pub struct FixedDim {
    size: usize,
    element: DType,
}

impl FixedDim {
    pub fn new(size: usize, element: DType) -> Self {
        Self { size, element }
    }

    /// `DType` of `size * element`.
    pub fn make(size: usize, element: DType) -> DType {
        DType::new(Self::new(size, element))
    }

    /// Nests `element` in one fixed dimension per entry of `shape`, outermost first.
    pub fn make_nd(shape: &[usize], element: DType) -> DType {
        shape
            .iter()
            .rev()
            .fold(element, |el, &n| Self::make(n, el))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn element(&self) -> &DType {
        &self.element
    }
}

/// `(size, stride)` from the first slot of a dimension's arrmeta.
pub(crate) fn dim_slot(tp: &DType, meta: &[MetaSlot]) -> Result<(usize, isize)> {
    meta.first()
        .and_then(MetaSlot::dim)
        .ok_or_else(|| Error::Shape(format!("arrmeta of {tp} lacks its dimension slot")))
}

impl BaseType for FixedDim {
    fn id(&self) -> TypeId {
        TypeId::FixedDim
    }

    fn kind(&self) -> Kind {
        Kind::Dimension
    }

    fn data_size(&self) -> usize {
        self.size * self.element.data_size()
    }

    fn data_alignment(&self) -> usize {
        self.element.data_alignment()
    }

    fn flags(&self) -> TypeFlags {
        TypeFlags::DIM | self.element.flags().inherited()
    }

    fn meta_slots(&self) -> usize {
        1 + self.element.meta_slots()
    }

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} * {}", self.size, self.element)
    }

    fn eq_type(&self, other: &dyn BaseType) -> bool {
        same_as::<Self>(other).is_some_and(|o| o.size == self.size && o.element == self.element)
    }

    fn element_type(&self) -> Option<&DType> {
        Some(&self.element)
    }

    fn dim_size(&self) -> Option<usize> {
        Some(self.size)
    }

    fn arrmeta_default(&self, out: &mut Arrmeta) -> Result<()> {
        out.push(MetaSlot::Dim {
            size: self.size,
            stride: self.element.data_size() as isize,
        });
        out.extend(self.element.arrmeta_default()?);
        Ok(())
    }

    fn check_arrmeta(&self, meta: &[MetaSlot]) -> Result<()> {
        match meta.first() {
            Some(MetaSlot::Dim { size, .. }) if *size == self.size => {
                self.element.check_arrmeta(&meta[1..])
            }
            _ => Err(Error::Shape(format!(
                "arrmeta does not describe a dimension of length {}",
                self.size
            ))),
        }
    }

    unsafe fn print_data(
        &self,
        out: &mut dyn fmt::Write,
        meta: &[MetaSlot],
        data: *const u8,
    ) -> fmt::Result {
        let stride = meta.first().and_then(MetaSlot::dim).ok_or(fmt::Error)?.1;
        out.write_char('[')?;
        for i in 0..self.size {
            if i > 0 {
                out.write_str(", ")?;
            }
            let el = data.wrapping_offset(i as isize * stride);
            // SAFETY: the arrmeta describes `size` elements at `stride`.
            unsafe { self.element.print_data(out, &meta[1..], el)? };
        }
        out.write_char(']')
    }

    fn is_lossless_assignment(&self, dst: &DType, src: &DType) -> bool {
        match (dst.downcast::<FixedDim>(), src.downcast::<FixedDim>()) {
            (Some(d), Some(s)) => {
                (d.size == s.size || s.size == 1)
                    && crate::assign::is_lossless_assignment(&d.element, &s.element)
            }
            (Some(d), None) => crate::assign::is_lossless_assignment(&d.element, src),
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
        let Some(d) = dst.downcast::<FixedDim>() else {
            return Ok(None);
        };
        let (_, dst_stride) = dim_slot(dst, dst_meta)?;
        let (src_stride, src_el, src_el_meta) = match src.downcast::<FixedDim>() {
            Some(s) if src.ndim() == dst.ndim() => {
                let (src_size, stride) = dim_slot(src, src_meta)?;
                let stride = match src_size {
                    n if n == d.size => stride,
                    1 => 0,
                    _ => {
                        return Err(Error::Broadcast {
                            lhs: dst.shape(),
                            rhs: src.shape(),
                        });
                    }
                };
                (stride, &s.element, &src_meta[1..])
            }
            // fewer source dimensions: broadcast the whole source along this one
            Some(_) if src.ndim() < dst.ndim() => (0, src, src_meta),
            Some(_) => {
                return Err(Error::Broadcast {
                    lhs: dst.shape(),
                    rhs: src.shape(),
                });
            }
            None => (0, src, src_meta),
        };
        let root = ckb.emplace(
            DimLoopFrame {
                size: d.size,
                dst_stride,
                src_stride: vec![src_stride],
            },
            kernreq,
        );
        make_assignment_kernel(
            ckb,
            &d.element,
            &dst_meta[1..],
            src_el,
            src_el_meta,
            KernelRequest::Strided,
            errmode,
        )?;
        Ok(Some(root))
    }

    fn matches(&self, _this: &DType, candidate: &DType, vars: &mut TypeVars) -> bool {
        candidate
            .downcast::<FixedDim>()
            .is_some_and(|c| c.size == self.size && self.element.matches(&c.element, vars))
    }

    fn substitute(&self, _this: &DType, vars: &TypeVars, concrete: bool) -> Result<DType> {
        Ok(FixedDim::make(
            self.size,
            self.element.substitute(vars, concrete)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::assignment_kernel;

    #[test]
    fn nested_dims_print() {
        let tp = FixedDim::make_nd(&[2, 3], DType::FLOAT32);
        assert_eq!(tp.to_string(), "2 * 3 * float32");
        assert_eq!(tp.meta_slots(), 2);
    }

    #[test]
    fn dim_assignment_broadcasts_scalar() -> anyhow::Result<()> {
        let dst_tp = FixedDim::make(4, DType::INT64);
        let dst_meta = dst_tp.arrmeta_default()?;
        let mut k = assignment_kernel(
            &dst_tp,
            &dst_meta,
            &DType::INT16,
            &[],
            KernelRequest::Single,
            ErrorMode::Fractional,
        )?;
        let mut out = [0i64; 4];
        let v = -7i16;
        unsafe { k.single(out.as_mut_ptr().cast(), &[(&v as *const i16).cast()])? };
        assert_eq!(out, [-7; 4]);
        Ok(())
    }

    #[test]
    fn dim_assignment_stretches_length_one() -> anyhow::Result<()> {
        let dst_tp = FixedDim::make_nd(&[2, 3], DType::FLOAT64);
        let src_tp = FixedDim::make_nd(&[2, 1], DType::INT32);
        let dst_meta = dst_tp.arrmeta_default()?;
        let src_meta = src_tp.arrmeta_default()?;
        let mut k = assignment_kernel(
            &dst_tp,
            &dst_meta,
            &src_tp,
            &src_meta,
            KernelRequest::Single,
            ErrorMode::Fractional,
        )?;
        let mut out = [0f64; 6];
        let src = [5i32, 9];
        unsafe { k.single(out.as_mut_ptr().cast(), &[src.as_ptr().cast()])? };
        assert_eq!(out, [5.0, 5.0, 5.0, 9.0, 9.0, 9.0]);
        Ok(())
    }

    #[test]
    fn mismatched_dims_rejected() {
        let dst_tp = FixedDim::make(3, DType::INT32);
        let src_tp = FixedDim::make(2, DType::INT32);
        let (dm, sm) = (dst_tp.arrmeta_default().unwrap(), src_tp.arrmeta_default().unwrap());
        let err = assignment_kernel(
            &dst_tp,
            &dm,
            &src_tp,
            &sm,
            KernelRequest::Single,
            ErrorMode::None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Broadcast { .. }));
    }
}
