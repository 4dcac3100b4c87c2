//! Process configuration read from typed environment variables.
//!
//! Every tunable is described by a [`TypedEnvVar`] that carries its own parse and format callbacks.
//! [`EvalContext::from_environment`] collects them into the value threaded through evaluation;
//! malformed values are logged and replaced by the defaults.

use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, OnceLock};

use thiserror::Error;
use tracing::warn;

use crate::assign::ErrorMode;

/// Environment variables understood by ndkern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvVar {
    /// Default error mode of assignments (`none`, `overflow`, `fractional`, `inexact`).
    ErrorMode,
    /// Replication factor above which a casting assignment converts its source once into a temporary.
    BroadcastCopyRatio,
    /// Minimum element count for which `assign_parallel` spawns threads.
    ParallelMinElements,
}

impl EnvVar {
    /// Canonical key of the variable.
    pub const fn key(self) -> &'static str {
        match self {
            EnvVar::ErrorMode => "NDKERN_ERROR_MODE",
            EnvVar::BroadcastCopyRatio => "NDKERN_BROADCAST_COPY_RATIO",
            EnvVar::ParallelMinElements => "NDKERN_PARALLEL_MIN_ELEMENTS",
        }
    }
}

/// Errors emitted when reading typed environment variables.
#[derive(Debug, Clone, Error)]
pub enum EnvVarError {
    #[error("failed to parse environment variable {name} from '{value}': {message}")]
    Parse {
        name: &'static str,
        value: String,
        message: String,
    },
}

/// Callback parsing an environment string.
pub type ParseFn<T> = fn(&str) -> Result<T, String>;
/// Callback formatting a typed value for the environment.
pub type FormatFn<T> = fn(&T) -> String;

/// Serialised access to the process environment.
pub struct Environment;

impl Environment {
    /// Acquire the global environment mutex.
    pub fn lock() -> MutexGuard<'static, ()> {
        static ENV_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(var: EnvVar) -> Option<String> {
        std::env::var(var.key()).ok()
    }

    fn set_locked(var: EnvVar, value: &str, _guard: &mut MutexGuard<'static, ()>) {
        // SAFETY: the guard proves the caller holds the environment mutex.
        unsafe { std::env::set_var(var.key(), value) };
    }

    fn remove_locked(var: EnvVar, _guard: &mut MutexGuard<'static, ()>) {
        // SAFETY: as in `set_locked`.
        unsafe { std::env::remove_var(var.key()) };
    }
}

/// Descriptor for a strongly typed environment variable.
#[derive(Clone, Copy)]
pub struct TypedEnvVar<T> {
    var: EnvVar,
    parse: ParseFn<T>,
    format: FormatFn<T>,
    _marker: PhantomData<T>,
}

impl<T> TypedEnvVar<T> {
    pub const fn new(var: EnvVar, parse: ParseFn<T>, format: FormatFn<T>) -> Self {
        Self {
            var,
            parse,
            format,
            _marker: PhantomData,
        }
    }

    pub const fn key(&self) -> &'static str {
        self.var.key()
    }

    /// Reads and parses the variable; `Ok(None)` when unset.
    pub fn get(&self) -> Result<Option<T>, EnvVarError> {
        match Environment::get(self.var) {
            Some(raw) => (self.parse)(&raw)
                .map(Some)
                .map_err(|message| EnvVarError::Parse {
                    name: self.key(),
                    value: raw,
                    message,
                }),
            None => Ok(None),
        }
    }

    /// Reads the variable, logging and discarding malformed values.
    pub fn get_or(&self, default: T) -> T {
        match self.get() {
            Ok(Some(v)) => v,
            Ok(None) => default,
            Err(err) => {
                warn!(%err, "ignoring malformed environment variable");
                default
            }
        }
    }

    /// Sets the variable for the lifetime of the returned guard.
    pub fn set_guard(&self, value: T) -> EnvVarGuard {
        EnvVarGuard::set(self.var, &(self.format)(&value))
    }
}

/// Restores the previous state of an environment variable on drop.
pub struct EnvVarGuard {
    var: EnvVar,
    previous: Option<String>,
}

impl EnvVarGuard {
    /// Sets a raw value; useful for testing malformed input.
    pub fn set(var: EnvVar, value: &str) -> Self {
        let mut lock = Environment::lock();
        let previous = Environment::get(var);
        Environment::set_locked(var, value, &mut lock);
        Self { var, previous }
    }

    pub fn unset(var: EnvVar) -> Self {
        let mut lock = Environment::lock();
        let previous = Environment::get(var);
        Environment::remove_locked(var, &mut lock);
        Self { var, previous }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        let mut lock = Environment::lock();
        match &self.previous {
            Some(previous) => Environment::set_locked(self.var, previous, &mut lock),
            None => Environment::remove_locked(self.var, &mut lock),
        }
    }
}

fn parse_usize(raw: &str) -> Result<usize, String> {
    raw.trim().parse::<usize>().map_err(|e| e.to_string())
}

fn parse_ratio(raw: &str) -> Result<usize, String> {
    match parse_usize(raw)? {
        0 => Err("ratio must be positive".to_string()),
        n => Ok(n),
    }
}

fn parse_errmode(raw: &str) -> Result<ErrorMode, String> {
    raw.trim().parse::<ErrorMode>().map_err(|e| e.to_string())
}

fn format_display<T: ToString>(v: &T) -> String {
    v.to_string()
}

/// `NDKERN_ERROR_MODE`
pub const ERROR_MODE: TypedEnvVar<ErrorMode> = TypedEnvVar::new(
    EnvVar::ErrorMode,
    parse_errmode,
    format_display,
);

/// `NDKERN_BROADCAST_COPY_RATIO`
pub const BROADCAST_COPY_RATIO: TypedEnvVar<usize> =
    TypedEnvVar::new(EnvVar::BroadcastCopyRatio, parse_ratio, format_display);

/// `NDKERN_PARALLEL_MIN_ELEMENTS`
pub const PARALLEL_MIN_ELEMENTS: TypedEnvVar<usize> =
    TypedEnvVar::new(EnvVar::ParallelMinElements, parse_usize, format_display);

/// Evaluation settings threaded through array operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalContext {
    /// Error mode used when an operation does not name one.
    pub errmode: ErrorMode,
    /// A casting assignment whose destination holds more than this many copies of the source
    /// converts the source once into a temporary before broadcasting it.
    pub broadcast_copy_ratio: usize,
    /// Below this many elements `assign_parallel` stays on the calling thread.
    pub parallel_min_elements: usize,
}

impl Default for EvalContext {
    fn default() -> Self {
        Self {
            errmode: ErrorMode::Fractional,
            broadcast_copy_ratio: 5,
            parallel_min_elements: 1 << 16,
        }
    }
}

impl EvalContext {
    /// Defaults overridden by whatever the environment sets.
    pub fn from_environment() -> Self {
        let d = Self::default();
        Self {
            errmode: ERROR_MODE.get_or(d.errmode),
            broadcast_copy_ratio: BROADCAST_COPY_RATIO.get_or(d.broadcast_copy_ratio),
            parallel_min_elements: PARALLEL_MIN_ELEMENTS.get_or(d.parallel_min_elements),
        }
    }

    pub fn with_errmode(self, errmode: ErrorMode) -> Self {
        Self { errmode, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_when_unset() {
        let _a = EnvVarGuard::unset(EnvVar::ErrorMode);
        let _b = EnvVarGuard::unset(EnvVar::BroadcastCopyRatio);
        let _c = EnvVarGuard::unset(EnvVar::ParallelMinElements);
        assert_eq!(EvalContext::from_environment(), EvalContext::default());
    }

    #[test]
    #[serial]
    fn reads_typed_values() -> anyhow::Result<()> {
        let _a = ERROR_MODE.set_guard(ErrorMode::Inexact);
        let _b = BROADCAST_COPY_RATIO.set_guard(9);
        assert_eq!(ERROR_MODE.get()?, Some(ErrorMode::Inexact));
        let ctx = EvalContext::from_environment();
        assert_eq!(ctx.errmode, ErrorMode::Inexact);
        assert_eq!(ctx.broadcast_copy_ratio, 9);
        Ok(())
    }

    #[test]
    #[serial]
    fn malformed_values_fall_back() {
        let _a = EnvVarGuard::set(EnvVar::ErrorMode, "sloppy");
        let _b = EnvVarGuard::set(EnvVar::BroadcastCopyRatio, "0");
        assert!(ERROR_MODE.get().is_err());
        let ctx = EvalContext::from_environment();
        assert_eq!(ctx.errmode, ErrorMode::Fractional);
        assert_eq!(ctx.broadcast_copy_ratio, 5);
    }

    #[test]
    #[serial]
    fn guard_restores_previous_value() {
        let _outer = EnvVarGuard::set(EnvVar::ParallelMinElements, "10");
        {
            let _inner = PARALLEL_MIN_ELEMENTS.set_guard(20);
            assert_eq!(Environment::get(EnvVar::ParallelMinElements).as_deref(), Some("20"));
        }
        assert_eq!(Environment::get(EnvVar::ParallelMinElements).as_deref(), Some("10"));
    }
}
