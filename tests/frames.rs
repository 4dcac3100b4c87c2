use core::fmt;
use std::sync::Arc;

use ndkern::NdArray;
use ndkern::ndkern_core::arrmeta::MetaSlot;
use ndkern::ndkern_core::assign::{ErrorMode, assignment_kernel};
use ndkern::ndkern_core::kernel::{Children, KernelBuilder, KernelFrame, KernelRequest, live_frames};
use ndkern::ndkern_core::types::{Convert, DType, FixedDim, FuncProto, TypeId};
use ndkern::ndkern_core::{Error, Result};
use ndkern::ndkern_func::arithmetic::{add, divide};
use ndkern::ndkern_func::callable::{BaseCallable, build_kernel};
use ndkern::ndkern_func::elwise::Elwise;
use serial_test::serial;

const MODES: [ErrorMode; 4] = [
    ErrorMode::None,
    ErrorMode::Overflow,
    ErrorMode::Fractional,
    ErrorMode::Inexact,
];

struct Noop;

impl KernelFrame for Noop {
    unsafe fn single(&mut self, _: Children<'_>, _: *mut u8, _: &[*const u8]) -> Result<()> {
        Ok(())
    }
}

/// Places one frame, then fails.
struct FailsHalfway {
    proto: FuncProto,
}

impl fmt::Debug for FailsHalfway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FailsHalfway")
    }
}

impl BaseCallable for FailsHalfway {
    fn name(&self) -> &str {
        "fails_halfway"
    }

    fn proto(&self) -> &FuncProto {
        &self.proto
    }

    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        _dst: &DType,
        _dst_meta: &[MetaSlot],
        _src: &[DType],
        _src_meta: &[&[MetaSlot]],
        kernreq: KernelRequest,
    ) -> Result<usize> {
        ckb.emplace(Noop, kernreq);
        Err(Error::Unsupported("halfway".into()))
    }
}

#[test]
#[serial]
fn kernels_release_exactly_their_frames() -> anyhow::Result<()> {
    let before = live_frames();
    {
        let operands = [DType::parse("3 * int32")?, DType::FLOAT64];
        let (_, kernel) = build_kernel(&*add()?, &operands, KernelRequest::Single)?;
        assert_eq!(live_frames(), before + kernel.len());
        let copy = assignment_kernel(
            &DType::FLOAT32,
            &[],
            &DType::INT64,
            &[],
            KernelRequest::Strided,
            ErrorMode::Inexact,
        )?;
        assert_eq!(live_frames(), before + kernel.len() + copy.len());
    }
    assert_eq!(live_frames(), before);
    Ok(())
}

/// Builds the assignment kernel for `dst <- src` and checks the live-frame count while it
/// exists and after it drops.
fn check_assignment_frames(
    dst: &DType,
    src: &DType,
    kernreq: KernelRequest,
    errmode: ErrorMode,
) -> anyhow::Result<()> {
    let before = live_frames();
    {
        let kernel = assignment_kernel(
            dst,
            &dst.arrmeta_default()?,
            src,
            &src.arrmeta_default()?,
            kernreq,
            errmode,
        )?;
        assert!(!kernel.is_empty(), "{dst} <- {src}");
        assert_eq!(live_frames(), before + kernel.len(), "{dst} <- {src} under {errmode}");
    }
    assert_eq!(live_frames(), before, "{dst} <- {src} under {errmode}");
    Ok(())
}

#[test]
#[serial]
fn every_builtin_pair_releases_its_frames() -> anyhow::Result<()> {
    for dst in TypeId::BUILTINS.map(DType::from) {
        for src in TypeId::BUILTINS.map(DType::from) {
            for errmode in MODES {
                for kernreq in [KernelRequest::Single, KernelRequest::Strided] {
                    check_assignment_frames(&dst, &src, kernreq, errmode)?;
                }
            }
        }
    }
    Ok(())
}

#[test]
#[serial]
fn compound_pairs_release_their_frames() -> anyhow::Result<()> {
    let pairs = [
        ("fixed_string[8, 'utf8']", "fixed_string[4, 'utf16']"),
        ("fixed_string[4, 'ascii']", "fixed_string[4, 'ascii']"),
        ("fixed_string[16, 'utf8']", "float64"),
        ("int32", "fixed_string[8, 'ascii']"),
        ("?int32", "int32"),
        ("?float64", "?int16"),
        ("{x: int64, y: float32}", "{y: float64, x: int8}"),
        ("3 * float64", "3 * int32"),
        ("2 * 3 * int64", "3 * uint8"),
        ("4 * ?float32", "int16"),
        ("2 * {x: float64}", "1 * {x: int32}"),
    ];
    for (dst, src) in pairs {
        let (dst, src) = (DType::parse(dst)?, DType::parse(src)?);
        for errmode in MODES {
            check_assignment_frames(&dst, &src, KernelRequest::Single, errmode)?;
            check_assignment_frames(&dst, &src, KernelRequest::Strided, errmode)?;
        }
    }

    for errmode in MODES {
        let lazy = Convert::make(DType::FLOAT64, DType::INT32, ErrorMode::Fractional);
        check_assignment_frames(&DType::FLOAT32, &lazy, KernelRequest::Strided, errmode)?;
        let lifted = FixedDim::make(2, lazy);
        check_assignment_frames(&DType::parse("2 * int64")?, &lifted, KernelRequest::Single, errmode)?;
    }
    Ok(())
}

#[test]
#[serial]
fn unsupported_nested_pairs_release_partial_frames() -> anyhow::Result<()> {
    let before = live_frames();
    let dst = DType::parse("2 * int32")?;
    let src = DType::parse("2 * {x: int32}")?;
    let err = assignment_kernel(
        &dst,
        &dst.arrmeta_default()?,
        &src,
        &src.arrmeta_default()?,
        KernelRequest::Strided,
        ErrorMode::Fractional,
    );
    assert!(matches!(err, Err(Error::NoConversion { .. })));
    assert_eq!(live_frames(), before);
    Ok(())
}

#[test]
#[serial]
fn failed_builds_and_runs_leave_no_frames() -> anyhow::Result<()> {
    let before = live_frames();

    let lifted = Elwise::make(Arc::new(FailsHalfway {
        proto: FuncProto::parse("(int32) -> int32")?,
    }));
    let err = build_kernel(&*lifted, &[DType::parse("2 * int32")?], KernelRequest::Single);
    assert!(matches!(err, Err(Error::Unsupported(_))));
    assert_eq!(live_frames(), before);

    let a = NdArray::from_vec(&[3], vec![1i32, 2, 3])?;
    let z = NdArray::from_vec(&[3], vec![1i32, 0, 1])?;
    assert!(matches!(NdArray::call(&divide()?, &[&a, &z]), Err(Error::Arithmetic(_))));
    assert_eq!(live_frames(), before);
    Ok(())
}
