//! Calling callables on whole arrays.

use itertools::Itertools;
use ndkern_core::arrmeta::{Arrmeta, MetaSlot, dims_arrmeta};
use ndkern_core::assign::check_alignment;
use ndkern_core::kernel::{KernelBuilder, KernelRequest, MAX_ARGS};
use ndkern_core::{Error, Result};
use ndkern_func::callable::Callable;
use tracing::debug;

use crate::array::NdArray;

impl NdArray {
    /// Calls `f` with each array as one operand of type `shape * element` and returns the result
    /// as a new array.
    ///
    /// Scalar callables are lifted over the dimensions by dispatch, broadcasting as needed.
    pub fn call(f: &Callable, args: &[&NdArray]) -> Result<NdArray> {
        if args.len() > MAX_ARGS {
            return Err(Error::Unsupported(format!(
                "cannot call `{}` with more than {MAX_ARGS} operands",
                f.name()
            )));
        }
        for a in args {
            check_alignment(&a.tp, a.data_ptr(), &a.shape, &a.strides)?;
        }
        let src_tps = args.iter().map(|a| a.array_type()).collect_vec();
        let src_meta: Vec<Arrmeta> = args.iter().map(|a| a.array_meta()).collect();
        let src_meta_refs: Vec<&[MetaSlot]> = src_meta.iter().map(Vec::as_slice).collect();

        let dst_tp = f.resolve(&src_tps)?;
        let dst = NdArray::empty(&[], dst_tp.clone())?;
        let dst_meta = dims_arrmeta(&dst.shape, &dst.strides)
            .into_iter()
            .chain(dst.meta.iter().cloned())
            .collect_vec();

        let mut ckb = KernelBuilder::new();
        f.instantiate(&mut ckb, &dst_tp, &dst_meta, &src_tps, &src_meta_refs, KernelRequest::Single)?;
        let mut kernel = ckb.finalize()?;
        debug!(callable = f.name(), %dst_tp, frames = kernel.len(), "array call");

        let ptrs = args.iter().map(|a| a.data_ptr().cast_const()).collect_vec();
        // SAFETY: the kernel was built for these arrays' types and layouts.
        unsafe { kernel.single(dst.data_ptr(), &ptrs)? };
        Ok(dst)
    }
}
