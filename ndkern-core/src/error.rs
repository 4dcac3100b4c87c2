//! Error type shared by every ndkern crate.

use thiserror::Error;

use crate::assign::ErrorMode;
use crate::types::DType;

/// Why a single value was rejected by an assignment kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeReason {
    /// The value does not fit in the destination range (this includes NaN and infinities into integers).
    Overflow,
    /// A floating value with a fractional part was assigned to an integer.
    Fractional,
    /// The destination cannot represent the value exactly.
    Inexact,
    /// A complex value with a nonzero imaginary component was assigned to a real destination.
    Imaginary,
    /// A string does not fit in the destination.
    Truncated,
    /// A string contains characters the destination encoding lacks.
    Unencodable,
}

impl core::fmt::Display for RangeReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            RangeReason::Overflow => "overflow",
            RangeReason::Fractional => "fractional part",
            RangeReason::Inexact => "inexact",
            RangeReason::Imaginary => "nonzero imaginary part",
            RangeReason::Truncated => "truncated",
            RangeReason::Unencodable => "unencodable character",
        })
    }
}

/// Error type of ndkern.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no conversion available from {src} to {dst}")]
    NoConversion { dst: DType, src: DType },

    #[error("no overload of `{name}` accepts operands ({})", join(operands))]
    UnresolvedOverload { name: String, operands: Vec<DType> },

    #[error("signature {proto} does not accept operands ({})", join(operands))]
    SignatureMismatch { proto: String, operands: Vec<DType> },

    #[error("`{name}` expects {expected} operands, got {found}")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("cannot assign value {value} from {src} to {dst} with error mode {mode}: {reason}")]
    ConversionRange {
        value: String,
        src: DType,
        dst: DType,
        mode: ErrorMode,
        reason: RangeReason,
    },

    #[error("invalid value {value:?} for {dst}")]
    InvalidValue { value: String, dst: DType },

    #[error("missing value assigned to non-option type {dst}")]
    MissingValue { dst: DType },

    #[error("data of type {tp} is not aligned to {align} bytes")]
    Misaligned { tp: DType, align: usize },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("shapes {lhs:?} and {rhs:?} cannot be broadcast together")]
    Broadcast { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("shape error: {0}")]
    Shape(String),

    #[error("type parse error at byte {pos}: {msg}")]
    TypeParse { pos: usize, msg: String },

    #[error("type variable `{0}` is not bound")]
    UnboundTypeVar(String),

    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    #[error("foreign callable `{context}` failed with status {code}")]
    Foreign { code: i32, context: String },

    #[error(transparent)]
    Env(#[from] crate::config::EnvVarError),
}

fn join(tps: &[DType]) -> String {
    tps.iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result alias used throughout ndkern.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Stable numeric code used when an error crosses the C boundary.
    pub fn code(&self) -> i32 {
        match self {
            Error::NoConversion { .. } => 1,
            Error::UnresolvedOverload { .. } => 2,
            Error::SignatureMismatch { .. } => 3,
            Error::ArgumentCount { .. } => 4,
            Error::ConversionRange { .. } => 5,
            Error::InvalidValue { .. } => 6,
            Error::MissingValue { .. } => 7,
            Error::Misaligned { .. } => 8,
            Error::Unsupported(_) => 9,
            Error::Broadcast { .. } => 10,
            Error::Shape(_) => 11,
            Error::TypeParse { .. } => 12,
            Error::UnboundTypeVar(_) => 13,
            Error::Arithmetic(_) => 14,
            Error::Foreign { code, .. } => *code,
            Error::Env(_) => 15,
        }
    }
}
