use core::fmt;

use itertools::Itertools;
use rustc_hash::FxHashSet;

use super::{BaseType, DType, Kind, TypeFlags, TypeId, TypeVars, same_as};
use crate::arrmeta::{Arrmeta, MetaSlot};
use crate::assign::{ErrorMode, is_lossless_assignment, make_assignment_kernel};
use crate::kernel::{Children, KernelBuilder, KernelFrame, KernelRequest};
use crate::{Error, Result};

/// One named field of a struct.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub tp: DType,
    /// Byte offset inside the struct.
    pub offset: usize,
    /// Index of the field's first arrmeta slot inside the struct's arrmeta.
    pub meta_offset: usize,
}

/// `{name: T, ...}` with C layout.
#[derive(Debug)]
pub struct StructType {
    fields: Vec<Field>,
    size: usize,
    align: usize,
    meta_slots: usize,
    flags: TypeFlags,
}

impl StructType {
    pub fn new(fields: Vec<(String, DType)>) -> Result<Self> {
        let mut seen = FxHashSet::default();
        let mut offset = 0usize;
        let mut meta_offset = 0;
        let mut align = 1;
        let mut flags = TypeFlags::NONE;
        let mut out = Vec::with_capacity(fields.len());
        for (name, tp) in fields {
            if !seen.insert(name.clone()) {
                return Err(Error::Unsupported(format!("duplicate struct field `{name}`")));
            }
            let a = tp.data_alignment();
            offset = offset.next_multiple_of(a);
            align = align.max(a);
            flags = flags | tp.flags().inherited();
            let slots = tp.meta_slots();
            out.push(Field {
                name,
                offset,
                meta_offset,
                tp,
            });
            offset += out[out.len() - 1].tp.data_size();
            meta_offset += slots;
        }
        Ok(Self {
            fields: out,
            size: offset.next_multiple_of(align),
            align,
            meta_slots: meta_offset,
            flags,
        })
    }

    pub fn make(fields: Vec<(String, DType)>) -> Result<DType> {
        Ok(DType::new(Self::new(fields)?))
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn field_meta<'m>(&self, field: &Field, meta: &'m [MetaSlot]) -> &'m [MetaSlot] {
        &meta[field.meta_offset..field.meta_offset + field.tp.meta_slots()]
    }
}

impl BaseType for StructType {
    fn id(&self) -> TypeId {
        TypeId::Struct
    }

    fn kind(&self) -> Kind {
        Kind::Struct
    }

    fn data_size(&self) -> usize {
        self.size
    }

    fn data_alignment(&self) -> usize {
        self.align
    }

    fn flags(&self) -> TypeFlags {
        self.flags
    }

    fn meta_slots(&self) -> usize {
        self.meta_slots
    }

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}}}",
            self.fields
                .iter()
                .format_with(", ", |fl, g| g(&format_args!("{}: {}", fl.name, fl.tp)))
        )
    }

    fn eq_type(&self, other: &dyn BaseType) -> bool {
        same_as::<Self>(other).is_some_and(|o| {
            o.fields.len() == self.fields.len()
                && o.fields
                    .iter()
                    .zip(&self.fields)
                    .all(|(a, b)| a.name == b.name && a.tp == b.tp)
        })
    }

    fn arrmeta_default(&self, out: &mut Arrmeta) -> Result<()> {
        for f in &self.fields {
            out.extend(f.tp.arrmeta_default()?);
        }
        Ok(())
    }

    fn check_arrmeta(&self, meta: &[MetaSlot]) -> Result<()> {
        self.fields
            .iter()
            .try_for_each(|f| f.tp.check_arrmeta(self.field_meta(f, meta)))
    }

    unsafe fn print_data(
        &self,
        out: &mut dyn fmt::Write,
        meta: &[MetaSlot],
        data: *const u8,
    ) -> fmt::Result {
        out.write_char('{')?;
        for (i, f) in self.fields.iter().enumerate() {
            if i > 0 {
                out.write_str(", ")?;
            }
            write!(out, "{}: ", f.name)?;
            // SAFETY: field offsets lie inside the struct element the caller passes.
            unsafe { f.tp.print_data(out, self.field_meta(f, meta), data.add(f.offset))? };
        }
        out.write_char('}')
    }

    fn is_lossless_assignment(&self, dst: &DType, src: &DType) -> bool {
        let (Some(d), Some(s)) = (dst.downcast::<StructType>(), src.downcast::<StructType>()) else {
            return false;
        };
        d.fields.iter().all(|df| {
            s.field(&df.name)
                .is_some_and(|sf| is_lossless_assignment(&df.tp, &sf.tp))
        })
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
        let (Some(d), Some(s)) = (dst.downcast::<StructType>(), src.downcast::<StructType>()) else {
            return Ok(None);
        };
        let pairs = d
            .fields
            .iter()
            .map(|df| {
                s.field(&df.name).map(|sf| (df, sf)).ok_or_else(|| Error::NoConversion {
                    dst: dst.clone(),
                    src: src.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let root = ckb.emplace(StructAssignFrame { fields: Vec::new() }, kernreq);
        let mut fields = Vec::with_capacity(pairs.len());
        for (df, sf) in pairs {
            let rel = ckb.len() - root;
            make_assignment_kernel(
                ckb,
                &df.tp,
                d.field_meta(df, dst_meta),
                &sf.tp,
                s.field_meta(sf, src_meta),
                KernelRequest::Single,
                errmode,
            )?;
            fields.push((df.offset, sf.offset, rel));
        }
        ckb.frame_mut::<StructAssignFrame>(root).fields = fields;
        Ok(Some(root))
    }

    fn matches(&self, _this: &DType, candidate: &DType, vars: &mut TypeVars) -> bool {
        candidate.downcast::<StructType>().is_some_and(|c| {
            c.fields.len() == self.fields.len()
                && self
                    .fields
                    .iter()
                    .zip(&c.fields)
                    .all(|(p, f)| p.name == f.name && p.tp.matches(&f.tp, vars))
        })
    }

    fn substitute(&self, _this: &DType, vars: &TypeVars, concrete: bool) -> Result<DType> {
        let fields = self
            .fields
            .iter()
            .map(|f| Ok((f.name.clone(), f.tp.substitute(vars, concrete)?)))
            .collect::<Result<Vec<_>>>()?;
        StructType::make(fields)
    }
}

/// Assigns destination fields from the source fields of the same name.
struct StructAssignFrame {
    /// `(dst offset, src offset, child)` per destination field.
    fields: Vec<(usize, usize, usize)>,
}

impl KernelFrame for StructAssignFrame {
    unsafe fn single(
        &mut self,
        mut children: Children<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> Result<()> {
        for &(d, s, rel) in &self.fields {
            // SAFETY: offsets lie inside the struct elements the caller passes.
            unsafe { children.single(rel, dst.add(d), &[src[0].add(s)])? };
        }
        Ok(())
    }
}
