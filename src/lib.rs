//! Runtime-typed array kernels.
//!
//! Umbrella crate over the ndkern workspace.

/// dtypes, arrmeta, kernels, assignment and broadcasting iteration
pub use ndkern_core;

/// callables, overload dispatch and the builtin callable families
pub use ndkern_func;

/// the strided array container
pub use ndkern_array;

pub use ndkern_array::NdArray;
pub use ndkern_core::{Error, Result};

pub mod prelude {
    //! A prelude module re-exporting commonly used items.

    pub use ndkern_array::prelude::*;
    pub use ndkern_core::prelude::*;
    pub use ndkern_func::prelude::*;
}
