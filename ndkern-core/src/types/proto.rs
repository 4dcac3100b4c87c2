use core::fmt;

use itertools::Itertools;

use super::{DType, TypeVars};
use crate::{Error, Result};

/// Prototype of a callable: operand types and the return type, possibly symbolic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncProto {
    args: Vec<DType>,
    ret: DType,
}

impl FuncProto {
    pub fn new(args: Vec<DType>, ret: DType) -> Self {
        Self { args, ret }
    }

    /// Parses `(A, B) -> R`.
    pub fn parse(src: &str) -> Result<Self> {
        super::parse::parse_proto(src)
    }

    pub fn args(&self) -> &[DType] {
        &self.args
    }

    pub fn arg(&self, i: usize) -> &DType {
        &self.args[i]
    }

    pub fn nargs(&self) -> usize {
        self.args.len()
    }

    pub fn ret(&self) -> &DType {
        &self.ret
    }

    pub fn is_symbolic(&self) -> bool {
        self.ret.is_symbolic() || self.args.iter().any(DType::is_symbolic)
    }

    /// Matches every operand against its pattern, then substitutes the bindings into the
    /// return type.
    pub fn resolve(&self, src: &[DType]) -> Result<(DType, TypeVars)> {
        let mismatch = || Error::SignatureMismatch {
            proto: self.to_string(),
            operands: src.to_vec(),
        };
        if src.len() != self.args.len() {
            return Err(mismatch());
        }
        let mut vars = TypeVars::new();
        for (pattern, tp) in self.args.iter().zip(src) {
            if !pattern.matches(tp, &mut vars) {
                return Err(mismatch());
            }
        }
        let ret = self.ret.substitute(&vars, true)?;
        Ok((ret, vars))
    }
}

impl fmt::Display for FuncProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) -> {}", self.args.iter().format(", "), self.ret)
    }
}

impl core::str::FromStr for FuncProto {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
