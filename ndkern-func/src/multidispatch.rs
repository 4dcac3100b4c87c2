//! Overload resolution across several callables sharing one name.
//!
//! Resolution order for operand types `src`:
//!
//! 1. an overload whose prototype lists exactly the builtin tags of `src`,
//! 2. the first non-builtin overload (patterns, compound types) accepting `src`,
//! 3. with promotion enabled, the exact overload for the promoted common type, fed through
//!    [`ConvertArgs`],
//! 4. when an operand has dimensions, the dispatch itself lifted elementwise,
//!
//! and otherwise [`Error::UnresolvedOverload`].

use core::fmt;
use std::sync::Arc;

use itertools::Itertools;
use ndkern_core::arrmeta::MetaSlot;
use ndkern_core::kernel::{KernelBuilder, KernelRequest};
use ndkern_core::types::{DType, FuncProto, TypeId, promote_types};
use ndkern_core::{Error, Result};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::callable::{Abstract, BaseCallable, Callable, CallableFlags, check_arity, downcast};
use crate::convert::ConvertArgs;
use crate::elwise::{Elwise, instantiate_lifted, resolve_lifted};

enum Selected {
    Overload(Callable),
    Lifted,
}

/// A named set of overloads.
#[derive(Clone)]
pub struct Multidispatch {
    name: String,
    proto: FuncProto,
    exact: FxHashMap<Vec<TypeId>, Callable>,
    others: Vec<Callable>,
    promote: bool,
}

fn builtin_key(tps: &[DType]) -> Option<Vec<TypeId>> {
    tps.iter()
        .map(|tp| tp.is_builtin().then(|| tp.id()))
        .collect()
}

impl Multidispatch {
    /// Dispatch over `overloads`, each taking as many operands as `proto` declares.
    ///
    /// A later overload with the same builtin signature as an earlier one replaces it.
    pub fn new(
        name: impl Into<String>,
        proto: FuncProto,
        overloads: impl IntoIterator<Item = Callable>,
    ) -> Result<Self> {
        let mut md = Self {
            name: name.into(),
            proto,
            exact: FxHashMap::default(),
            others: Vec::new(),
            promote: false,
        };
        md.insert(overloads)?;
        Ok(md)
    }

    pub fn make(
        name: impl Into<String>,
        proto: FuncProto,
        overloads: impl IntoIterator<Item = Callable>,
    ) -> Result<Callable> {
        Ok(Arc::new(Self::new(name, proto, overloads)?))
    }

    /// Enables resolution of mixed builtin operands through their promoted common type.
    pub fn with_promotion(mut self) -> Self {
        self.promote = true;
        self
    }

    fn insert(&mut self, overloads: impl IntoIterator<Item = Callable>) -> Result<()> {
        for f in overloads {
            if f.proto().nargs() != self.proto.nargs() {
                return Err(Error::ArgumentCount {
                    name: self.name.clone(),
                    expected: self.proto.nargs(),
                    found: f.proto().nargs(),
                });
            }
            match builtin_key(f.proto().args()) {
                Some(key) => {
                    self.exact.insert(key, f);
                }
                None => self.others.push(f),
            }
        }
        Ok(())
    }

    /// A new callable dispatching over the overloads of `base` plus `overloads`.
    ///
    /// `base` is either a dispatch or an abstract declaration; other callables have no
    /// overload table to extend.
    pub fn with_overloads(
        base: &Callable,
        overloads: impl IntoIterator<Item = Callable>,
    ) -> Result<Callable> {
        if let Some(md) = downcast::<Multidispatch>(base) {
            let mut md = md.clone();
            md.insert(overloads)?;
            return Ok(Arc::new(md));
        }
        if let Some(decl) = downcast::<Abstract>(base) {
            return Multidispatch::make(decl.name(), decl.proto().clone(), overloads);
        }
        Err(Error::Unsupported(format!(
            "`{}` has no overload table to extend",
            base.name()
        )))
    }

    /// Number of registered overloads.
    pub fn len(&self) -> usize {
        self.exact.len() + self.others.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, src: &[DType]) -> Result<Selected> {
        check_arity(&self.name, &self.proto, src)?;
        let key = builtin_key(src);
        if let Some(f) = key.as_ref().and_then(|k| self.exact.get(k)) {
            debug!(name = %self.name, ?key, "exact overload");
            return Ok(Selected::Overload(f.clone()));
        }
        if let Some(f) = self.others.iter().find(|f| f.resolve(src).is_ok()) {
            debug!(name = %self.name, proto = %f.proto(), "pattern overload");
            return Ok(Selected::Overload(f.clone()));
        }
        if self.promote {
            if let Some(f) = self.promoted(key.as_deref())? {
                return Ok(Selected::Overload(f));
            }
        }
        if src.iter().any(DType::is_dim) {
            debug!(name = %self.name, "elementwise lift");
            return Ok(Selected::Lifted);
        }
        Err(Error::UnresolvedOverload {
            name: self.name.clone(),
            operands: src.to_vec(),
        })
    }

    fn promoted(&self, key: Option<&[TypeId]>) -> Result<Option<Callable>> {
        let Some((first, rest)) = key.and_then(|k| k.split_first()) else {
            return Ok(None);
        };
        let common = rest
            .iter()
            .try_fold(*first, |acc, &id| promote_types(acc, id));
        let Some(common) = common else {
            return Ok(None);
        };
        let promoted_key = vec![common; rest.len() + 1];
        let Some(f) = self.exact.get(&promoted_key) else {
            return Ok(None);
        };
        debug!(name = %self.name, ?common, "promoted overload");
        let targets = promoted_key.into_iter().map(DType::from).collect_vec();
        ConvertArgs::make(f.clone(), targets).map(Some)
    }

    /// The overload handling operands of types `src`.
    pub fn overload(&self, src: &[DType]) -> Result<Callable> {
        Ok(match self.select(src)? {
            Selected::Overload(f) => f,
            Selected::Lifted => Elwise::make(Arc::new(self.clone())),
        })
    }
}

impl fmt::Debug for Multidispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multidispatch")
            .field("name", &self.name)
            .field("proto", &self.proto.to_string())
            .field("overloads", &self.len())
            .field("promote", &self.promote)
            .finish()
    }
}

impl BaseCallable for Multidispatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn proto(&self) -> &FuncProto {
        &self.proto
    }

    fn flags(&self) -> CallableFlags {
        CallableFlags::DISPATCH
    }

    fn resolve(&self, src: &[DType]) -> Result<DType> {
        match self.select(src)? {
            Selected::Overload(f) => f.resolve(src),
            Selected::Lifted => resolve_lifted(self, src),
        }
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
        match self.select(src)? {
            Selected::Overload(f) => f.instantiate(ckb, dst, dst_meta, src, src_meta, kernreq),
            Selected::Lifted => instantiate_lifted(self, ckb, dst, dst_meta, src, src_meta, kernreq),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply;
    use crate::callable::{build_kernel, overload};

    fn adders() -> anyhow::Result<Callable> {
        Ok(Multidispatch::make(
            "add",
            FuncProto::parse("(Any, Any) -> Any")?,
            [
                apply::binary("add", |a: i32, b: i32| a.wrapping_add(b)),
                apply::binary("add", |a: f64, b: f64| a + b),
            ],
        )?)
    }

    #[test]
    fn exact_overload_wins() -> anyhow::Result<()> {
        let add = adders()?;
        assert_eq!(add.resolve(&[DType::INT32, DType::INT32])?, DType::INT32);
        let f = overload(&add, &[DType::FLOAT64, DType::FLOAT64])?;
        assert_eq!(f.proto().to_string(), "(float64, float64) -> float64");
        Ok(())
    }

    #[test]
    fn unknown_operands_are_unresolved() -> anyhow::Result<()> {
        let add = adders()?;
        match add.resolve(&[DType::INT32, DType::FLOAT64]) {
            Err(Error::UnresolvedOverload { name, operands }) => {
                assert_eq!(name, "add");
                assert_eq!(operands, vec![DType::INT32, DType::FLOAT64]);
            }
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn promotion_converts_operands() -> anyhow::Result<()> {
        let add = Multidispatch::new(
            "add",
            FuncProto::parse("(Any, Any) -> Any")?,
            [apply::binary("add", |a: f64, b: f64| a + b)],
        )?
        .with_promotion();
        let (dst, mut k) = build_kernel(&add, &[DType::INT32, DType::FLOAT32], KernelRequest::Single)?;
        assert_eq!(dst, DType::FLOAT64);
        let (a, b, mut out) = (2i32, 0.5f32, 0f64);
        unsafe {
            k.single(
                (&mut out as *mut f64).cast(),
                &[(&a as *const i32).cast(), (&b as *const f32).cast()],
            )?
        };
        assert_eq!(out, 2.5);
        Ok(())
    }

    #[test]
    fn dimensions_are_lifted() -> anyhow::Result<()> {
        let add = adders()?;
        let tp = DType::parse("2 * int32")?;
        assert_eq!(add.resolve(&[tp.clone(), DType::INT32])?.to_string(), "2 * int32");
        let lifted = overload(&add, &[tp.clone(), tp])?;
        assert!(downcast::<Elwise>(&lifted).is_some());
        Ok(())
    }

    #[test]
    fn abstract_declarations_gain_overloads() -> anyhow::Result<()> {
        let decl = Abstract::make("neg", FuncProto::parse("(T) -> T")?);
        let neg = Multidispatch::with_overloads(&decl, [apply::unary("neg", |a: i8| a.wrapping_neg())])?;
        assert_eq!(neg.resolve(&[DType::INT8])?, DType::INT8);
        let more = Multidispatch::with_overloads(&neg, [apply::unary("neg", |a: f32| -a)])?;
        assert_eq!(more.resolve(&[DType::FLOAT32])?, DType::FLOAT32);
        assert!(neg.resolve(&[DType::FLOAT32]).is_err());
        assert!(Multidispatch::with_overloads(&more, [apply::binary("x", |a: u8, _b: u8| a)]).is_err());
        let plain = apply::unary("id", |a: u8| a);
        assert!(matches!(
            Multidispatch::with_overloads(&plain, []),
            Err(Error::Unsupported(_))
        ));
        Ok(())
    }
}
