//! The host-facing runtime.
//!
//! A [`Runtime`] owns one engine context for its whole lifetime. Global state
//! set by one script stays visible to later ones; nothing is reset between
//! calls. Calls from several threads are serialized on an internal lock.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::{RuntimeConfig, millis};
use crate::engine::Engine;
use crate::error::{ConversionError, Error, Result};
use crate::value::{Value, from_value, to_value};
use crate::watchdog::Watchdog;

/// Script name used for [`Runtime::eval`].
pub const EVAL_SCRIPT_NAME: &str = "<eval>";

/// Script name used for the preload script.
pub const PRELOAD_SCRIPT_NAME: &str = "<preload>";

/// An embedded JavaScript runtime.
///
/// ```
/// use std::time::Duration;
/// use kiln_core::{Runtime, Value};
///
/// let runtime = Runtime::new(Some("function echo(...args) { return args; }")).unwrap();
/// assert_eq!(runtime.eval("1 + 2", None).unwrap(), Value::Int(3));
///
/// let result = runtime
///     .call("echo", &[Value::Int(1)], Some(Duration::from_secs(1)))
///     .unwrap();
/// assert_eq!(result, Value::Array(vec![Value::Int(1)]));
/// ```
pub struct Runtime {
    // Declared before the watchdog so the engine is torn down first.
    engine: Mutex<Engine>,
    watchdog: Watchdog,
    config: RuntimeConfig,
}

impl Runtime {
    /// Create a runtime with the default config, running `preload` first if given.
    pub fn new(preload: Option<&str>) -> Result<Self> {
        Self::with_config(RuntimeConfig::default(), preload)
    }

    /// Fluent construction.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Create a runtime from `config`.
    ///
    /// The preload script runs synchronously with no deadline; if it fails to
    /// compile or throws, no runtime is returned.
    pub fn with_config(config: RuntimeConfig, preload: Option<&str>) -> Result<Self> {
        let watchdog = Watchdog::new();
        let engine = Engine::new(&config, watchdog.signal().clone())?;

        if let Some(source) = preload {
            engine
                .evaluate(PRELOAD_SCRIPT_NAME, source)
                .map_err(|e| {
                    let err = e.into_host(None);
                    tracing::warn!(error = %err, "preload script failed");
                    Error::Preload(Box::new(err))
                })?;
            tracing::debug!(bytes = source.len(), "preload script evaluated");
        }

        Ok(Self {
            engine: Mutex::new(engine),
            watchdog,
            config,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Evaluate `source` as a global script and return its completion value.
    pub fn eval(&self, source: &str, timeout: Option<Duration>) -> Result<Value> {
        self.eval_named(EVAL_SCRIPT_NAME, source, timeout)
    }

    /// Like [`eval`](Self::eval), labelling the script `name` in diagnostics.
    pub fn eval_named(&self, name: &str, source: &str, timeout: Option<Duration>) -> Result<Value> {
        let timeout = self.config.effective_timeout(timeout);
        let engine = self.lock();
        tracing::debug!(script = name, timeout_ms = timeout.map(millis), "eval");

        self.watchdog
            .run(timeout, || engine.evaluate(name, source))
            .map_err(|e| log_failure(e.into_host(timeout), name))
    }

    /// Call the global function `name` with `args` in order.
    pub fn call(&self, name: &str, args: &[Value], timeout: Option<Duration>) -> Result<Value> {
        let timeout = self.config.effective_timeout(timeout);
        let engine = self.lock();
        tracing::debug!(function = name, args = args.len(), "call");

        self.watchdog
            .run(timeout, || engine.invoke(name, args))
            .map_err(|e| log_failure(e.into_host(timeout), name))
    }

    /// Call with host-typed arguments and result.
    ///
    /// `args` must serialize to a sequence (a tuple, array or `Vec`); each
    /// element becomes one argument. `()` means no arguments. Tuples lower to
    /// engine arrays and come back as sequences unless `R` asks for a tuple.
    pub fn call_as<A, R>(&self, name: &str, args: A, timeout: Option<Duration>) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let args = match to_value(&args)? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(ConversionError::unsupported(format!(
                    "call arguments must serialize to a sequence, got {}",
                    other.kind()
                ))
                .into());
            }
        };
        let result = self.call(name, &args, timeout)?;
        Ok(from_value(result)?)
    }

    /// Run a garbage collection cycle on the engine.
    pub fn run_gc(&self) {
        self.lock().run_gc();
    }

    fn lock(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_failure(err: Error, script: &str) -> Error {
    match &err {
        Error::Timeout(timeout) => {
            tracing::warn!(script, timeout_ms = millis(*timeout), "script timed out");
        }
        other => tracing::debug!(script, error = %other, "script failed"),
    }
    err
}

/// Builder for [`Runtime`].
#[derive(Debug, Default, Clone)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    preload: Option<String>,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn preload(mut self, source: impl Into<String>) -> Self {
        self.preload = Some(source.into());
        self
    }

    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.config.memory_limit = Some(bytes);
        self
    }

    pub fn max_stack_size(mut self, bytes: usize) -> Self {
        self.config.max_stack_size = Some(bytes);
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout_ms = Some(millis(timeout));
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    pub fn build(self) -> Result<Runtime> {
        Runtime::with_config(self.config, self.preload.as_deref())
    }
}
