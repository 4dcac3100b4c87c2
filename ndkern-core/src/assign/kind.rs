//! Registry of converters between different kinds of types.

use std::sync::OnceLock;

use rustc_hash::FxHashMap;

use super::ErrorMode;
use crate::arrmeta::MetaSlot;
use crate::kernel::{KernelBuilder, KernelRequest};
use crate::types::{DType, Kind, string};
use crate::Result;

/// Factory placing a converter kernel; same contract as `make_assignment_kernel`.
pub type ConverterFn = fn(
    &mut KernelBuilder,
    &DType,
    &[MetaSlot],
    &DType,
    &[MetaSlot],
    KernelRequest,
    ErrorMode,
) -> Result<usize>;

/// Converters keyed by `(destination kind, source kind)`.
#[derive(Clone, Default)]
pub struct KindConverters {
    table: FxHashMap<(Kind, Kind), ConverterFn>,
}

const NUMERIC_KINDS: [Kind; 5] = [Kind::Bool, Kind::Int, Kind::UInt, Kind::Real, Kind::Complex];

impl KindConverters {
    pub fn new() -> Self {
        Self::default()
    }

    /// The converters installed in the process-wide registry.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        for kind in NUMERIC_KINDS {
            reg.register(Kind::String, kind, string::make_numeric_to_string);
            reg.register(kind, Kind::String, string::make_string_to_numeric);
        }
        reg
    }

    /// Installs `conv`, replacing any converter for the same pair.
    pub fn register(&mut self, dst: Kind, src: Kind, conv: ConverterFn) -> &mut Self {
        self.table.insert((dst, src), conv);
        self
    }

    pub fn get(&self, dst: Kind, src: Kind) -> Option<ConverterFn> {
        self.table.get(&(dst, src)).copied()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// The process-wide registry, built on first use.
pub fn kind_converters() -> &'static KindConverters {
    static REGISTRY: OnceLock<KindConverters> = OnceLock::new();
    REGISTRY.get_or_init(KindConverters::with_defaults)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_string_numeric_pairs() {
        let reg = kind_converters();
        assert_eq!(reg.len(), 10);
        assert!(reg.get(Kind::String, Kind::Real).is_some());
        assert!(reg.get(Kind::Complex, Kind::String).is_some());
        assert!(reg.get(Kind::Struct, Kind::Int).is_none());
    }

    #[test]
    fn register_replaces() {
        let mut reg = KindConverters::new();
        reg.register(Kind::Bytes, Kind::Int, string::make_numeric_to_string);
        reg.register(Kind::Bytes, Kind::Int, string::make_string_to_numeric);
        assert_eq!(reg.len(), 1);
    }
}
