//! A minimal strided array driving ndkern kernels.
//!
//! [`NdArray`] pairs a memory block with an element dtype and a strided layout. Assignment,
//! casting, reductions and callable invocation all build kernels with `ndkern-core` and
//! `ndkern-func` and sweep them over the array with the broadcasting strided iterator.

#![warn(missing_docs)]

// core concepts

pub mod array;

// functionalities built on core concepts

mod assign;

mod view;

mod reduce;

mod call;

pub use array::NdArray;

pub mod prelude {
    //! A prelude module re-exporting commonly used items.

    pub use crate::array::NdArray;
}
