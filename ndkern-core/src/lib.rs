//! Core crate of ndkern.
//!
//! Runtime dtypes, their arrmeta, the kernel builder, the assignment kernel factory and the
//! broadcasting strided iterator.

#![warn(missing_docs)]
#![allow(clippy::type_complexity)]

// core concepts

pub mod types;

pub mod arrmeta;

pub mod kernel;

// functionalities built on core concepts

pub mod assign;

pub mod iter;

pub mod shape;

// common

pub mod config;

pub mod error;

pub mod memblock;

pub use error::{Error, Result};

pub mod prelude {
    //! A prelude module re-exporting commonly used items.

    pub use crate::arrmeta::*;
    pub use crate::assign::{
        ErrorMode, StridedOperand, assign_strided, assignment_kernel, is_lossless_assignment,
    };
    pub use crate::config::EvalContext;
    pub use crate::error::{Error, Result};
    pub use crate::iter::{SkipOutcome, StridedIter};
    pub use crate::kernel::{Children, Kernel, KernelBuilder, KernelFrame, KernelRequest};
    pub use crate::memblock::MemoryBlock;
    pub use crate::types::{
        BaseType, BuiltinScalar, DType, FuncProto, Kind, TypeFlags, TypeId, TypeVars,
    };
}
