//! Operand conversion in front of a callable.

use core::fmt;
use std::sync::Arc;

use ndkern_core::arrmeta::{Arrmeta, MetaSlot};
use ndkern_core::assign::{ErrorMode, make_assignment_kernel};
use ndkern_core::kernel::{Children, KernelBuilder, KernelFrame, KernelRequest, MAX_ARGS};
use ndkern_core::memblock::AlignedBuf;
use ndkern_core::types::{DType, FuncProto};
use ndkern_core::{Error, Result};

use crate::callable::{BaseCallable, Callable, check_arity};

/// Runs `child` on operands first converted to `targets`.
///
/// Conversions use [`ErrorMode::None`]: the targets come from type promotion, which picks
/// types wide enough for the operands by construction.
pub struct ConvertArgs {
    proto: FuncProto,
    child: Callable,
    targets: Vec<DType>,
}

impl ConvertArgs {
    pub fn new(child: Callable, targets: Vec<DType>) -> Result<Self> {
        check_arity(child.name(), child.proto(), &targets)?;
        if targets.len() > MAX_ARGS {
            return Err(Error::Unsupported(format!(
                "cannot convert more than {MAX_ARGS} operands"
            )));
        }
        let proto = FuncProto::new(targets.clone(), child.resolve(&targets)?);
        Ok(Self {
            proto,
            child,
            targets,
        })
    }

    pub fn make(child: Callable, targets: Vec<DType>) -> Result<Callable> {
        Ok(Arc::new(Self::new(child, targets)?))
    }
}

impl fmt::Debug for ConvertArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConvertArgs({:?} <- {:?})", self.child, self.targets)
    }
}

impl BaseCallable for ConvertArgs {
    fn name(&self) -> &str {
        self.child.name()
    }

    fn proto(&self) -> &FuncProto {
        &self.proto
    }

    fn resolve(&self, src: &[DType]) -> Result<DType> {
        check_arity(self.name(), &self.proto, src)?;
        Ok(self.proto.ret().clone())
    }

    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        dst: &DType,
        dst_meta: &[MetaSlot],
        src: &[DType],
        src_meta: &[&[MetaSlot]],
        kernreq: KernelRequest,
    ) -> Result<usize> {
        check_arity(self.name(), &self.proto, src)?;
        let target_meta = self
            .targets
            .iter()
            .map(DType::arrmeta_default)
            .collect::<Result<Vec<Arrmeta>>>()?;
        let target_meta_refs: Vec<&[MetaSlot]> = target_meta.iter().map(Vec::as_slice).collect();

        let root = ckb.emplace(
            ConvertArgsFrame {
                child: 0,
                converters: Vec::new(),
            },
            kernreq,
        );
        let child = self.child.instantiate(
            ckb,
            dst,
            dst_meta,
            &self.targets,
            &target_meta_refs,
            KernelRequest::Single,
        )?;
        let mut converters = Vec::with_capacity(src.len());
        for (i, (tp, target)) in src.iter().zip(&self.targets).enumerate() {
            if tp == target {
                converters.push(None);
                continue;
            }
            let off = make_assignment_kernel(
                ckb,
                target,
                &target_meta[i],
                tp,
                src_meta[i],
                KernelRequest::Single,
                ErrorMode::None,
            )?;
            converters.push(Some((off - root, AlignedBuf::new(target.data_size()))));
        }
        let frame = ckb.frame_mut::<ConvertArgsFrame>(root);
        frame.child = child - root;
        frame.converters = converters;
        Ok(root)
    }
}

/// Converts each operand into its own temporary, then calls the child on the temporaries.
struct ConvertArgsFrame {
    child: usize,
    converters: Vec<Option<(usize, AlignedBuf)>>,
}

impl KernelFrame for ConvertArgsFrame {
    unsafe fn single(
        &mut self,
        mut children: Children<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> Result<()> {
        let mut args = [core::ptr::null::<u8>(); MAX_ARGS];
        for (i, (&s, conv)) in src.iter().zip(&mut self.converters).enumerate() {
            args[i] = match conv {
                Some((rel, tmp)) => {
                    // SAFETY: `tmp` holds one aligned element of the target type.
                    unsafe { children.single(*rel, tmp.as_mut_ptr(), &[s])? };
                    tmp.as_mut_ptr().cast_const()
                }
                None => s,
            };
        }
        // SAFETY: every argument now has the type the child was built for.
        unsafe { children.single(self.child, dst, &args[..src.len()]) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply;
    use crate::callable::build_kernel;

    #[test]
    fn converts_mismatched_operands_only() -> anyhow::Result<()> {
        let add = apply::binary("add", |a: f64, b: f64| a + b);
        let f = ConvertArgs::make(add, vec![DType::FLOAT64, DType::FLOAT64])?;
        let (dst, mut k) = build_kernel(&*f, &[DType::INT16, DType::FLOAT64], KernelRequest::Strided)?;
        assert_eq!(dst, DType::FLOAT64);
        assert_eq!(k.frame_names(), vec!["ConvertArgsFrame", "BinaryFrame", "BuiltinAssign"]);

        let a = [3i16, -4];
        let b = [0.5f64, 0.25];
        let mut out = [0f64; 2];
        unsafe { k.strided(out.as_mut_ptr().cast(), 8, &[a.as_ptr().cast(), b.as_ptr().cast()], &[2, 8], 2)? };
        assert_eq!(out, [3.5, -3.75]);
        Ok(())
    }
}
