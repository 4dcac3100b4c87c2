//! C-compatible records for passing callables and kernels across a library boundary.
//!
//! Types cross the boundary as type-expression strings (`"3 * int32"`), so both sides build
//! kernels for default arrmeta. Every function returns a status: `0` on success, otherwise the
//! [`Error::code`] of the failure or [`PANICKED`].
//!
//! Ownership: whoever holds a record owns `data` and releases it by calling `free` exactly once.

use core::ffi::{c_char, c_int, c_void};
use core::fmt;
use std::ffi::{CStr, CString};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use ndkern_core::arrmeta::{Arrmeta, MetaSlot};
use ndkern_core::kernel::{Children, Kernel, KernelBuilder, KernelFrame, KernelRequest};
use ndkern_core::types::{DType, FuncProto};
use ndkern_core::{Error, Result};
use tracing::debug;

use crate::callable::{BaseCallable, Callable, check_arity};

/// Status of a call that unwound instead of returning.
pub const PANICKED: c_int = -1;

/// Capacity of the buffer a resolved type string is written into on import.
pub const TYPE_BUF_LEN: usize = 1024;

pub type KernelSingleFn =
    unsafe extern "C" fn(data: *mut c_void, dst: *mut u8, src: *const *const u8, nsrc: usize) -> c_int;

pub type KernelStridedFn = unsafe extern "C" fn(
    data: *mut c_void,
    dst: *mut u8,
    dst_stride: isize,
    src: *const *const u8,
    src_stride: *const isize,
    nsrc: usize,
    count: usize,
) -> c_int;

pub type FreeFn = unsafe extern "C" fn(data: *mut c_void);

/// Writes the NUL-terminated destination type string of operands `src` into `out`.
pub type ResolveFn = unsafe extern "C" fn(
    data: *mut c_void,
    src: *const *const c_char,
    nsrc: usize,
    out: *mut c_char,
    out_len: usize,
) -> c_int;

/// Builds a kernel computing `dst` from `src` and stores its record in `out`.
pub type InstantiateFn = unsafe extern "C" fn(
    data: *mut c_void,
    dst: *const c_char,
    src: *const *const c_char,
    nsrc: usize,
    kernreq: c_int,
    out: *mut KernelRecord,
) -> c_int;

/// A finalised kernel.
#[repr(C)]
pub struct KernelRecord {
    pub data: *mut c_void,
    pub single: KernelSingleFn,
    pub strided: KernelStridedFn,
    pub free: FreeFn,
}

/// A callable.
#[repr(C)]
pub struct CallableRecord {
    pub data: *mut c_void,
    pub resolve: ResolveFn,
    pub instantiate: InstantiateFn,
    pub free: FreeFn,
}

fn request_code(kernreq: KernelRequest) -> c_int {
    match kernreq {
        KernelRequest::Single => 0,
        KernelRequest::Strided => 1,
        KernelRequest::Contiguous => 2,
    }
}

fn request_from_code(code: c_int) -> Result<KernelRequest> {
    match code {
        0 => Ok(KernelRequest::Single),
        1 => Ok(KernelRequest::Strided),
        2 => Ok(KernelRequest::Contiguous),
        _ => Err(Error::Unsupported(format!("unknown kernel request {code}"))),
    }
}

fn status(outcome: std::thread::Result<Result<()>>) -> c_int {
    match outcome {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            debug!(error = %e, "call across the C boundary failed");
            e.code()
        }
        Err(_) => PANICKED,
    }
}

/// # Safety
///
/// `ptr` must address `len` readable values unless `len` is zero.
unsafe fn slice_or_empty<'a, T>(ptr: *const T, len: usize) -> &'a [T] {
    if len == 0 {
        &[]
    } else {
        // SAFETY: guaranteed by the caller.
        unsafe { core::slice::from_raw_parts(ptr, len) }
    }
}

/// # Safety
///
/// `p` must point to a NUL-terminated string.
unsafe fn read_type(p: *const c_char) -> Result<DType> {
    // SAFETY: guaranteed by the caller.
    let text = unsafe { CStr::from_ptr(p) }
        .to_str()
        .map_err(|e| Error::Unsupported(format!("type string is not UTF-8: {e}")))?;
    DType::parse(text)
}

fn type_string(tp: &DType) -> Result<CString> {
    CString::new(tp.to_string())
        .map_err(|_| Error::Unsupported(format!("type `{tp}` contains a NUL byte")))
}

fn default_metas(tps: &[DType]) -> Result<Vec<Arrmeta>> {
    tps.iter().map(DType::arrmeta_default).collect()
}

fn has_default_layout(tp: &DType, meta: &[MetaSlot]) -> Result<bool> {
    let expected = tp.arrmeta_default()?;
    Ok(expected.len() == meta.len()
        && expected.iter().zip(meta).all(|(a, b)| match (a, b) {
            (MetaSlot::Dim { .. }, MetaSlot::Dim { .. }) => a.dim() == b.dim(),
            (MetaSlot::Block { offset: x, .. }, MetaSlot::Block { offset: y, .. }) => x == y,
            _ => false,
        }))
}

// export

unsafe extern "C" fn exported_kernel_single(
    data: *mut c_void,
    dst: *mut u8,
    src: *const *const u8,
    nsrc: usize,
) -> c_int {
    // SAFETY: `data` is the kernel boxed by `KernelRecord::export`.
    let kernel = unsafe { &mut *data.cast::<Kernel>() };
    // SAFETY: the caller passes `nsrc` operand pointers.
    let src = unsafe { slice_or_empty(src, nsrc) };
    // SAFETY: operand validity is the caller's contract.
    status(catch_unwind(AssertUnwindSafe(|| unsafe { kernel.single(dst, src) })))
}

unsafe extern "C" fn exported_kernel_strided(
    data: *mut c_void,
    dst: *mut u8,
    dst_stride: isize,
    src: *const *const u8,
    src_stride: *const isize,
    nsrc: usize,
    count: usize,
) -> c_int {
    // SAFETY: `data` is the kernel boxed by `KernelRecord::export`.
    let kernel = unsafe { &mut *data.cast::<Kernel>() };
    // SAFETY: the caller passes `nsrc` pointers and strides.
    let (src, src_stride) = unsafe { (slice_or_empty(src, nsrc), slice_or_empty(src_stride, nsrc)) };
    status(catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: operand validity is the caller's contract.
        unsafe { kernel.strided(dst, dst_stride, src, src_stride, count) }
    })))
}

unsafe extern "C" fn exported_kernel_free(data: *mut c_void) {
    // SAFETY: `data` came from `Box::into_raw` and is freed once.
    drop(unsafe { Box::from_raw(data.cast::<Kernel>()) });
}

impl KernelRecord {
    /// Hands `kernel` over to a record.
    pub fn export(kernel: Kernel) -> Self {
        Self {
            data: Box::into_raw(Box::new(kernel)).cast(),
            single: exported_kernel_single,
            strided: exported_kernel_strided,
            free: exported_kernel_free,
        }
    }
}

impl fmt::Debug for KernelRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelRecord").field("data", &self.data).finish()
    }
}

unsafe extern "C" fn exported_resolve(
    data: *mut c_void,
    src: *const *const c_char,
    nsrc: usize,
    out: *mut c_char,
    out_len: usize,
) -> c_int {
    // SAFETY: `data` is the callable boxed by `CallableRecord::export`.
    let callable = unsafe { &*data.cast::<Callable>() };
    status(catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: the caller passes `nsrc` NUL-terminated strings.
        let src = unsafe { slice_or_empty(src, nsrc) }
            .iter()
            .map(|&p| unsafe { read_type(p) })
            .collect::<Result<Vec<_>>>()?;
        let text = type_string(&callable.resolve(&src)?)?;
        let bytes = text.as_bytes_with_nul();
        if bytes.len() > out_len {
            return Err(Error::Unsupported(format!(
                "resolved type needs {} bytes, buffer holds {out_len}",
                bytes.len()
            )));
        }
        // SAFETY: `out` holds `out_len` writable bytes.
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr().cast(), out, bytes.len()) };
        Ok(())
    })))
}

unsafe extern "C" fn exported_instantiate(
    data: *mut c_void,
    dst: *const c_char,
    src: *const *const c_char,
    nsrc: usize,
    kernreq: c_int,
    out: *mut KernelRecord,
) -> c_int {
    // SAFETY: `data` is the callable boxed by `CallableRecord::export`.
    let callable = unsafe { &*data.cast::<Callable>() };
    status(catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: the caller passes NUL-terminated strings.
        let dst = unsafe { read_type(dst) }?;
        let src = unsafe { slice_or_empty(src, nsrc) }
            .iter()
            .map(|&p| unsafe { read_type(p) })
            .collect::<Result<Vec<_>>>()?;
        let kernreq = request_from_code(kernreq)?;
        let dst_meta = dst.arrmeta_default()?;
        let src_meta = default_metas(&src)?;
        let src_meta_refs: Vec<&[MetaSlot]> = src_meta.iter().map(Vec::as_slice).collect();
        let mut ckb = KernelBuilder::new();
        callable.instantiate(&mut ckb, &dst, &dst_meta, &src, &src_meta_refs, kernreq)?;
        let record = KernelRecord::export(ckb.finalize()?);
        // SAFETY: `out` is writable.
        unsafe { out.write(record) };
        Ok(())
    })))
}

unsafe extern "C" fn exported_callable_free(data: *mut c_void) {
    // SAFETY: `data` came from `Box::into_raw` and is freed once.
    drop(unsafe { Box::from_raw(data.cast::<Callable>()) });
}

impl CallableRecord {
    /// Hands a reference on `callable` over to a record.
    pub fn export(callable: Callable) -> Self {
        Self {
            data: Box::into_raw(Box::new(callable)).cast(),
            resolve: exported_resolve,
            instantiate: exported_instantiate,
            free: exported_callable_free,
        }
    }
}

impl fmt::Debug for CallableRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableRecord").field("data", &self.data).finish()
    }
}

// import

/// Wraps a record received from another library as a callable.
///
/// Kernels built by the result require default arrmeta on every operand.
///
/// # Safety
///
/// The functions of `record` must honour the contracts of this module, and its `data` must be
/// usable from any thread, since callables are shared.
pub unsafe fn from_record(
    name: impl Into<String>,
    proto: FuncProto,
    record: CallableRecord,
) -> Callable {
    Arc::new(ForeignCallable {
        name: name.into(),
        proto,
        record,
    })
}

struct ForeignCallable {
    name: String,
    proto: FuncProto,
    record: CallableRecord,
}

// SAFETY: required of the record by `from_record`.
unsafe impl Send for ForeignCallable {}
// SAFETY: required of the record by `from_record`.
unsafe impl Sync for ForeignCallable {}

impl Drop for ForeignCallable {
    fn drop(&mut self) {
        // SAFETY: the record is owned and freed once.
        unsafe { (self.record.free)(self.record.data) }
    }
}

impl fmt::Debug for ForeignCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignCallable({} : {})", self.name, self.proto)
    }
}

impl ForeignCallable {
    fn failed(&self, code: c_int, step: &str) -> Error {
        Error::Foreign {
            code,
            context: format!("{}: {step}", self.name),
        }
    }
}

impl BaseCallable for ForeignCallable {
    fn name(&self) -> &str {
        &self.name
    }

    fn proto(&self) -> &FuncProto {
        &self.proto
    }

    fn resolve(&self, src: &[DType]) -> Result<DType> {
        check_arity(&self.name, &self.proto, src)?;
        let strings = src.iter().map(type_string).collect::<Result<Vec<_>>>()?;
        let ptrs: Vec<*const c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        let mut buf = vec![0u8; TYPE_BUF_LEN];
        // SAFETY: the pointers and buffer outlive the call.
        let code = unsafe {
            (self.record.resolve)(
                self.record.data,
                ptrs.as_ptr(),
                ptrs.len(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        };
        if code != 0 {
            return Err(self.failed(code, "resolve"));
        }
        let text = CStr::from_bytes_until_nul(&buf)
            .map_err(|_| Error::Unsupported("resolved type string is not terminated".into()))?
            .to_str()
            .map_err(|e| Error::Unsupported(format!("type string is not UTF-8: {e}")))?;
        DType::parse(text)
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
        check_arity(&self.name, &self.proto, src)?;
        let layouts = core::iter::once((dst, dst_meta)).chain(src.iter().zip(src_meta.iter().copied()));
        for (tp, meta) in layouts {
            if !has_default_layout(tp, meta)? {
                return Err(Error::Unsupported(format!(
                    "foreign callable `{}` needs default arrmeta for {tp}",
                    self.name
                )));
            }
        }
        let dst_string = type_string(dst)?;
        let strings = src.iter().map(type_string).collect::<Result<Vec<_>>>()?;
        let ptrs: Vec<*const c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        let mut record = core::mem::MaybeUninit::<KernelRecord>::uninit();
        // SAFETY: the strings outlive the call and `record` is writable.
        let code = unsafe {
            (self.record.instantiate)(
                self.record.data,
                dst_string.as_ptr(),
                ptrs.as_ptr(),
                ptrs.len(),
                request_code(kernreq),
                record.as_mut_ptr(),
            )
        };
        if code != 0 {
            return Err(self.failed(code, "instantiate"));
        }
        // SAFETY: a zero status means the record was written.
        let record = unsafe { record.assume_init() };
        Ok(ckb.emplace(
            ForeignKernelFrame {
                record,
                name: self.name.clone(),
            },
            kernreq,
        ))
    }
}

/// Calls into a kernel owned by another library.
struct ForeignKernelFrame {
    record: KernelRecord,
    name: String,
}

// SAFETY: required of the record by `from_record`.
unsafe impl Send for ForeignKernelFrame {}

impl Drop for ForeignKernelFrame {
    fn drop(&mut self) {
        // SAFETY: the record is owned and freed once.
        unsafe { (self.record.free)(self.record.data) }
    }
}

impl ForeignKernelFrame {
    fn check(&self, code: c_int) -> Result<()> {
        match code {
            0 => Ok(()),
            code => Err(Error::Foreign {
                code,
                context: format!("{}: kernel", self.name),
            }),
        }
    }
}

impl KernelFrame for ForeignKernelFrame {
    unsafe fn single(
        &mut self,
        _children: Children<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> Result<()> {
        // SAFETY: forwarded from the caller.
        let code = unsafe { (self.record.single)(self.record.data, dst, src.as_ptr(), src.len()) };
        self.check(code)
    }

    unsafe fn strided(
        &mut self,
        _children: Children<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> Result<()> {
        // SAFETY: forwarded from the caller.
        let code = unsafe {
            (self.record.strided)(
                self.record.data,
                dst,
                dst_stride,
                src.as_ptr(),
                src_stride.as_ptr(),
                src.len(),
                count,
            )
        };
        self.check(code)
    }
}
