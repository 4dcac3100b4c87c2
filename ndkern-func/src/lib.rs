//! Callables of ndkern.
//!
//! A callable resolves operand dtypes to a destination dtype and instantiates kernels for them.
//! This crate provides the callable concept, overload dispatch, elementwise lifting over
//! dimensions and the builtin comparison, arithmetic and reduction callables.

#![warn(missing_docs)]
#![allow(clippy::type_complexity)]

// core concepts

pub mod callable;

pub mod multidispatch;

pub mod elwise;

// functionalities built on core concepts

pub mod apply;

pub mod convert;

pub mod comparison;

pub mod arithmetic;

pub mod reduction;

// common

pub mod abi;

pub mod prelude {
    //! A prelude module re-exporting commonly used items.

    pub use crate::callable::*;
    pub use crate::elwise::Elwise;
    pub use crate::multidispatch::Multidispatch;

    pub use crate::arithmetic::{ArithOp, add, divide, multiply, subtract};
    pub use crate::comparison::{CmpOp, equal, greater, greater_equal, less, less_equal, not_equal};
    pub use crate::reduction::{ReduceOp, max, min, sum};
}
