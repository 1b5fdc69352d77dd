//! Execution engine adapter over QuickJS.
//!
//! Owns the engine runtime and its one persistent context, and exposes the
//! two blocking primitives the host needs: evaluate a script and invoke a
//! global function. Both observe the [`InterruptSignal`] through the engine's
//! interrupt handler, so a deadline can abort them from another thread.

use std::ffi::CString;
use std::time::Duration;

use rquickjs::context::EvalOptions;
use rquickjs::function::Rest;
use rquickjs::{Context, Ctx, qjs};
use thiserror::Error;

use crate::config::RuntimeConfig;
use crate::error::{ConversionError, Error};
use crate::marshal::{EngineValue, MarshalError, Marshaler};
use crate::value::Value;
use crate::watchdog::InterruptSignal;

/// Adapter-level failure of one evaluate/invoke.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source failed to compile.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Script raised; carries the marshaled thrown value.
    #[error("uncaught exception: {message}")]
    Thrown { value: Value, message: String },

    /// Global is missing or not a function.
    #[error("'{0}' is not callable")]
    NotCallable(String),

    /// Interrupted by the watchdog.
    #[error("execution timed out")]
    TimedOut,

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("engine error: {0}")]
    Engine(String),
}

impl EngineError {
    /// Map into the host-facing taxonomy. `timeout` is the deadline that was
    /// in force, reported by [`Error::Timeout`].
    pub fn into_host(self, timeout: Option<Duration>) -> Error {
        match self {
            EngineError::Syntax(message) => Error::Syntax { message },
            EngineError::Thrown { value, message } => Error::Thrown { value, message },
            EngineError::NotCallable(name) => Error::NotCallable(name),
            EngineError::TimedOut => Error::Timeout(timeout.unwrap_or_default()),
            EngineError::Conversion(e) => Error::Conversion(e),
            EngineError::Engine(message) => Error::Engine(message),
        }
    }
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        err.into_host(None)
    }
}

impl From<rquickjs::Error> for EngineError {
    fn from(err: rquickjs::Error) -> Self {
        EngineError::Engine(err.to_string())
    }
}

/// One engine runtime with its single persistent context.
pub struct Engine {
    runtime: rquickjs::Runtime,
    context: Context,
    marshaler: Marshaler,
    strict: bool,
}

impl Engine {
    /// Create the engine and wire `signal` in as its interrupt handler.
    pub fn new(config: &RuntimeConfig, signal: InterruptSignal) -> Result<Self, EngineError> {
        let runtime = rquickjs::Runtime::new()?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        runtime.set_interrupt_handler(Some(Box::new(move || signal.is_interrupted())));

        let context = Context::full(&runtime)?;

        Ok(Self {
            runtime,
            context,
            marshaler: Marshaler::new(config.max_depth),
            strict: config.strict,
        })
    }

    pub fn marshaler(&self) -> &Marshaler {
        &self.marshaler
    }

    /// Compile and run `source` as a global script; return its completion value.
    ///
    /// `name` only labels diagnostics.
    pub fn evaluate(&self, name: &str, source: &str) -> Result<Value, EngineError> {
        let mut options = EvalOptions::default();
        options.global = true;
        options.strict = self.strict;

        self.context.with(|ctx| {
            match ctx.eval_with_options::<EngineValue<'_>, _>(source, options) {
                Ok(value) => self.marshal_result(&ctx, &value),
                Err(rquickjs::Error::Exception) => {
                    let thrown = ctx.catch();
                    if is_syntax_error(&thrown) && !compiles(&ctx, source, self.strict) {
                        let message = describe_exception(&thrown);
                        tracing::debug!(script = name, %message, "compilation failed");
                        return Err(EngineError::Syntax(message));
                    }
                    Err(self.thrown(&thrown))
                }
                Err(other) => Err(other.into()),
            }
        })
    }

    /// Call the global function `name` with `args`, in order, `this` undefined.
    pub fn invoke(&self, name: &str, args: &[Value]) -> Result<Value, EngineError> {
        self.context.with(|ctx| {
            let target: EngineValue<'_> = ctx
                .globals()
                .get(name)
                .map_err(|e| self.engine_failure(&ctx, e))?;
            let Some(function) = target.as_function() else {
                return Err(EngineError::NotCallable(name.to_string()));
            };

            let mut engine_args = Vec::with_capacity(args.len());
            for (index, arg) in args.iter().enumerate() {
                let converted = self
                    .marshaler
                    .to_engine(&ctx, arg)
                    .map_err(|e| self.marshal_failure(&ctx, e, Some(index)))?;
                engine_args.push(converted);
            }

            match function.call::<_, EngineValue<'_>>((Rest(engine_args),)) {
                Ok(value) => self.marshal_result(&ctx, &value),
                Err(e) => Err(self.engine_failure(&ctx, e)),
            }
        })
    }

    /// Trigger a garbage collection cycle.
    pub fn run_gc(&self) {
        self.runtime.run_gc();
    }

    fn marshal_result(&self, ctx: &Ctx<'_>, value: &EngineValue<'_>) -> Result<Value, EngineError> {
        self.marshaler
            .from_engine(value)
            .map_err(|e| self.marshal_failure(ctx, e, None))
    }

    fn marshal_failure(&self, ctx: &Ctx<'_>, err: MarshalError, index: Option<usize>) -> EngineError {
        match err {
            MarshalError::Conversion(e) => match index {
                Some(index) => EngineError::Conversion(e.at_index(index)),
                None => EngineError::Conversion(e),
            },
            MarshalError::Engine(e) => self.engine_failure(ctx, e),
        }
    }

    /// A pending exception becomes `Thrown`; anything else is an engine failure.
    fn engine_failure(&self, ctx: &Ctx<'_>, err: rquickjs::Error) -> EngineError {
        match err {
            rquickjs::Error::Exception => self.thrown(&ctx.catch()),
            other => other.into(),
        }
    }

    fn thrown(&self, thrown: &EngineValue<'_>) -> EngineError {
        let message = describe_exception(thrown);
        let value = match self.marshaler.from_engine(thrown) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "thrown value could not be marshaled");
                Value::String(message.clone())
            }
        };
        EngineError::Thrown { value, message }
    }
}

fn is_syntax_error(thrown: &EngineValue<'_>) -> bool {
    thrown
        .as_exception()
        .and_then(|e| e.as_object().get::<_, Option<String>>("name").ok().flatten())
        .is_some_and(|name| name == "SyntaxError")
}

/// Compile `source` as a global script without running it.
///
/// Separates compile failures of `source` from `SyntaxError`s raised while it
/// ran (`JSON.parse`, nested `eval`). Goes straight to the compiler, so
/// nothing the script did to its globals can change the answer.
fn compiles(ctx: &Ctx<'_>, source: &str, strict: bool) -> bool {
    let Ok(input) = CString::new(source) else {
        return false;
    };
    let mut flags = qjs::JS_EVAL_TYPE_GLOBAL | qjs::JS_EVAL_FLAG_COMPILE_ONLY;
    if strict {
        flags |= qjs::JS_EVAL_FLAG_STRICT;
    }
    let raw = ctx.as_raw().as_ptr();

    // SAFETY: `raw` is the live context `ctx` borrows, and `input` is
    // NUL-terminated right after `source.len()` bytes.
    let compiled = unsafe {
        qjs::JS_Eval(
            raw,
            input.as_ptr(),
            source.len() as _,
            c"<compile>".as_ptr(),
            flags as i32,
        )
    };
    // SAFETY: `compiled` is a value just returned by the engine.
    if unsafe { qjs::JS_IsException(compiled) } {
        let _ = ctx.catch();
        return false;
    }
    // SAFETY: the compiled script is owned here and never handed out.
    unsafe { qjs::JS_FreeValue(raw, compiled) };
    true
}

/// `Name: message` for error objects, the literal rendering otherwise.
fn describe_exception(thrown: &EngineValue<'_>) -> String {
    if let Some(exception) = thrown.as_exception() {
        let name: Option<String> = exception.as_object().get("name").ok().flatten();
        let message = exception.message().unwrap_or_default();
        return match name {
            Some(name) if message.is_empty() => name,
            Some(name) => format!("{}: {}", name, message),
            None => message,
        };
    }
    match Marshaler::default().from_engine(thrown) {
        Ok(value) => value.to_string(),
        Err(_) => format!("<{:?}>", thrown.type_of()),
    }
}
