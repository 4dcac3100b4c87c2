use ndkern::NdArray;
use ndkern::ndkern_core::assign::{ErrorMode, is_lossless_assignment};
use ndkern::ndkern_core::config::EvalContext;
use ndkern::ndkern_core::error::RangeReason;
use ndkern::ndkern_core::iter::StridedIter;
use ndkern::ndkern_core::shape::contiguous_strides;
use ndkern::ndkern_core::types::{DType, TypeId};
use ndkern::ndkern_core::Error;
use ndkern::ndkern_func::arithmetic::add;
use ndkern::ndkern_func::callable::{downcast, overload};
use ndkern::ndkern_func::comparison::less;
use ndkern::ndkern_func::elwise::Elwise;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MODES: [ErrorMode; 4] = [
    ErrorMode::Inexact,
    ErrorMode::Fractional,
    ErrorMode::Overflow,
    ErrorMode::None,
];

fn ctx(errmode: ErrorMode) -> EvalContext {
    EvalContext::default().with_errmode(errmode)
}

/// Raw bytes of a row-major array.
fn bytes(a: &NdArray) -> Vec<u8> {
    assert!(a.is_contiguous());
    let n = a.len() * a.tp().data_size();
    unsafe { core::slice::from_raw_parts(a.data_ptr().cast_const(), n) }.to_vec()
}

fn sample_values(rng: &mut StdRng, n: usize) -> Vec<f64> {
    (0..n)
        .map(|_| rng.random_range(-100_000i64..100_000) as f64 / 8.0)
        .collect()
}

#[test]
fn lossless_pairs_round_trip() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(0x6e64);
    let values = NdArray::from_vec(&[64], sample_values(&mut rng, 64))?;
    for src in TypeId::BUILTINS.map(DType::from) {
        let original = values.as_type(src.clone(), &ctx(ErrorMode::None))?;
        for dst in TypeId::BUILTINS.map(DType::from) {
            if !is_lossless_assignment(&dst, &src) {
                continue;
            }
            let there = original.as_type(dst.clone(), &ctx(ErrorMode::None))?;
            let back = there.as_type(src.clone(), &ctx(ErrorMode::None))?;
            assert_eq!(bytes(&back), bytes(&original), "{src} -> {dst} -> {src}");

            // nothing is lost, so the strictest mode accepts both legs too
            let checked = original.as_type(dst.clone(), &ctx(ErrorMode::Inexact))?;
            assert_eq!(bytes(&checked), bytes(&there), "{src} -> {dst}");
            checked.as_type(src.clone(), &ctx(ErrorMode::Inexact))?;
        }
    }
    Ok(())
}

#[test]
fn accepted_values_grow_as_the_mode_loosens() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let mut values = vec![
        0.0, 1.0, -1.0, 0.5, -2.75, 127.0, 128.0, 255.0, 256.0, -129.0, 65504.0, 65536.0, 1e10,
        -1e10, 3.0e38, 1e300, 1.0 / 3.0, f64::INFINITY, f64::NAN,
    ];
    values.extend(sample_values(&mut rng, 16));

    for src in TypeId::BUILTINS.map(DType::from) {
        for &v in &values {
            let one = NdArray::from_vec(&[1], vec![v])?.as_type(src.clone(), &ctx(ErrorMode::None))?;
            for dst in TypeId::BUILTINS.map(DType::from) {
                let outcomes: Vec<Option<Vec<u8>>> = MODES
                    .iter()
                    .map(|&m| one.as_type(dst.clone(), &ctx(m)).ok().map(|a| bytes(&a)))
                    .collect();
                let first_ok = outcomes.iter().position(Option::is_some);
                assert!(outcomes[3].is_some(), "{src} -> {dst} failed under none for {v}");
                if let Some(i) = first_ok {
                    for later in &outcomes[i..] {
                        assert_eq!(later, &outcomes[i], "{src} -> {dst} for {v}");
                    }
                }
            }
        }
    }
    Ok(())
}

#[test]
fn broadcast_sum_matches_replicated_operands() -> anyhow::Result<()> {
    let a = NdArray::from_vec(&[3, 1, 5], (1..=15).collect::<Vec<i32>>())?;
    let b = NdArray::from_vec(&[1, 4, 5], (100..120).collect::<Vec<i32>>())?;
    let c = NdArray::call(&add()?, &[&a, &b])?;
    assert_eq!(c.shape(), &[3, 4, 5]);
    for i in 0..3 {
        for j in 0..4 {
            for k in 0..5 {
                let expected = (1 + i * 5 + k) as i32 + (100 + j * 5 + k) as i32;
                assert_eq!(c.get::<i32>(&[i, j, k])?, expected);
            }
        }
    }

    let mut dst = NdArray::empty(&[3, 4, 5], DType::INT64)?;
    dst.assign_with(&a, &ctx(ErrorMode::Fractional))?;
    assert_eq!(dst.get::<i64>(&[2, 3, 4])?, 15);
    Ok(())
}

#[test]
fn contiguous_buffers_coalesce_to_one_axis() -> anyhow::Result<()> {
    let mut buf = vec![0f64; 24];
    let shape = [2, 3, 4];
    let strides = contiguous_strides(&shape, 8);
    let it = StridedIter::<1>::new(&shape, [buf.as_mut_ptr().cast()], [&strides])?;
    assert_eq!(it.ndim(), 1);
    assert_eq!(it.inner_size(), 24);

    // the same buffer walked backwards along every axis
    let last = buf.as_mut_ptr().wrapping_add(23).cast::<u8>();
    let reversed: Vec<isize> = strides.iter().map(|s| -s).collect();
    let it = StridedIter::<1>::new(&shape, [last], [&reversed])?;
    assert_eq!(it.ndim(), 1);
    assert_eq!(it.inner_size(), 24);
    assert_eq!(it.data(0), buf.as_mut_ptr().cast::<u8>());
    Ok(())
}

#[test]
fn float64_into_int32_under_each_mode() -> anyhow::Result<()> {
    let src = NdArray::from_vec(&[4], vec![1.5f64, 2.9, -3.5, 4.0])?;
    let mut dst = NdArray::empty(&[4], DType::INT32)?;
    match dst.assign_with(&src, &ctx(ErrorMode::Fractional)) {
        Err(Error::ConversionRange {
            value,
            src,
            dst,
            reason,
            ..
        }) => {
            assert_eq!(value, "1.5");
            assert_eq!((dst, src), (DType::INT32, DType::FLOAT64));
            assert_eq!(reason, RangeReason::Fractional);
        }
        other => panic!("unexpected {other:?}"),
    }
    dst.assign_with(&src, &ctx(ErrorMode::None))?;
    assert_eq!(dst.to_vec::<i32>()?, vec![1, 2, -3, 4]);
    Ok(())
}

#[test]
fn int32_comparison_uses_the_exact_entry() -> anyhow::Result<()> {
    let lt = less()?;
    let f = overload(&lt, &[DType::INT32, DType::INT32])?;
    assert_eq!(f.proto().to_string(), "(int32, int32) -> int32");
    assert!(downcast::<Elwise>(&f).is_none());
    assert_eq!(lt.resolve(&[DType::INT32, DType::INT32])?, DType::INT32);

    let text = DType::parse("fixed_string[4, 'utf8']")?;
    match lt.resolve(&[text.clone(), DType::INT32]) {
        Err(Error::UnresolvedOverload { name, operands }) => {
            assert_eq!(name, "less");
            assert_eq!(operands, vec![text, DType::INT32]);
        }
        other => panic!("unexpected {other:?}"),
    }
    Ok(())
}
