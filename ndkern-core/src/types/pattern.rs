use rustc_hash::FxHashMap;

use super::DType;
use crate::shape::broadcast_pair;

/// Name under which anonymous ellipsis dimensions of one signature are unified.
pub(crate) const ANONYMOUS_ELLIPSIS: &str = "...";

/// Value bound to a type variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// A dtype variable such as `T`.
    Type(DType),
    /// A single dimension variable such as `N` in `N * T`.
    Dim(usize),
    /// An ellipsis variable such as `Dims` in `Dims... * T`.
    Dims(Vec<usize>),
}

/// Type variable bindings collected while matching a signature.
#[derive(Debug, Clone, Default)]
pub struct TypeVars {
    map: FxHashMap<String, Binding>,
}

impl TypeVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.map.get(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Binds `name` to `tp`, or checks an existing binding.
    pub fn bind_type(&mut self, name: &str, tp: &DType) -> bool {
        match self.map.get(name) {
            Some(Binding::Type(bound)) => bound == tp,
            Some(_) => false,
            None => {
                self.map.insert(name.to_string(), Binding::Type(tp.clone()));
                true
            }
        }
    }

    /// Binds a dimension variable, or checks an existing binding.
    pub fn bind_dim(&mut self, name: &str, size: usize) -> bool {
        match self.map.get(name) {
            Some(Binding::Dim(bound)) => *bound == size,
            Some(_) => false,
            None => {
                self.map.insert(name.to_string(), Binding::Dim(size));
                true
            }
        }
    }

    /// Binds an ellipsis variable. A second occurrence broadcasts against the first.
    pub fn bind_dims(&mut self, name: &str, dims: &[usize]) -> bool {
        match self.map.get_mut(name) {
            Some(Binding::Dims(bound)) => match broadcast_pair(bound, dims) {
                Ok(shape) => {
                    *bound = shape;
                    true
                }
                Err(_) => false,
            },
            Some(_) => false,
            None => {
                self.map.insert(name.to_string(), Binding::Dims(dims.to_vec()));
                true
            }
        }
    }
}
