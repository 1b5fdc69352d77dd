//! Error types for kiln-core.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::value::Value;

/// Result type for kiln-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while evaluating or calling into a [`Runtime`](crate::Runtime).
#[derive(Debug, Error)]
pub enum Error {
    /// Source failed to compile.
    #[error("syntax error: {message}")]
    Syntax { message: String },

    /// Script executed and raised an exception.
    #[error("uncaught exception: {message}")]
    Thrown {
        /// The thrown value, marshaled into the shared value model.
        value: Value,
        /// Human-readable rendering of the thrown value.
        message: String,
    },

    /// The deadline elapsed before the script completed.
    #[error("script timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The invocation target is missing or is not a function.
    #[error("'{0}' is not a callable global")]
    NotCallable(String),

    /// A value could not be represented on the other side of the boundary.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// Engine-internal failure (allocation, runtime creation, ...).
    #[error("engine error: {0}")]
    Engine(String),

    /// A runtime config could not be parsed.
    #[error("invalid runtime config: {0}")]
    Config(String),

    /// The preload script failed, so the runtime was never constructed.
    #[error("preload script failed: {0}")]
    Preload(Box<Error>),
}

impl Error {
    /// The thrown value, if this is a [`Error::Thrown`].
    pub fn thrown_value(&self) -> Option<&Value> {
        match self {
            Error::Thrown { value, .. } => Some(value),
            Error::Preload(inner) => inner.thrown_value(),
            _ => None,
        }
    }

    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Suggested fix for the user, if there is an obvious one.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::Timeout(_) => Some("raise the limit with --timeout-ms or check for an unbounded loop"),
            Error::NotCallable(_) => Some("define the function in a preload script (--preload)"),
            Error::Conversion(e) if e.kind() == ConversionErrorKind::DepthExceeded => {
                Some("the value may contain a cycle")
            }
            Error::Conversion(e) if e.kind() == ConversionErrorKind::OutOfRange => {
                Some("integers beyond 2^53 - 1 must be passed as strings")
            }
            Error::Config(_) => Some("accepted fields: memory_limit, max_stack_size, max_depth, default_timeout_ms, strict"),
            Error::Preload(inner) => inner.hint(),
            _ => None,
        }
    }

    /// The error message followed by its hint, if any.
    pub fn with_hint(&self) -> String {
        match self.hint() {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}

/// Classification of a [`ConversionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionErrorKind {
    /// The value has no counterpart in the shared model.
    Unsupported,
    /// A number cannot be represented exactly.
    OutOfRange,
    /// A map key is neither a string nor an integer.
    InvalidKey,
    /// Nesting exceeded the configured depth (or the structure is cyclic).
    DepthExceeded,
    /// Error raised by a `Serialize`/`Deserialize` implementation.
    Custom,
}

/// A value that could not be converted, with the path of the offending element.
///
/// Paths are rendered from the root `$`, e.g. `$[2].name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionError {
    kind: ConversionErrorKind,
    message: String,
    /// Path segments, innermost last.
    path: Vec<PathSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Index(usize),
    Key(String),
}

impl ConversionError {
    pub fn new(kind: ConversionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: Vec::new(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ConversionErrorKind::Unsupported, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(ConversionErrorKind::OutOfRange, message)
    }

    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::new(ConversionErrorKind::InvalidKey, message)
    }

    pub fn depth_exceeded(max_depth: usize) -> Self {
        Self::new(
            ConversionErrorKind::DepthExceeded,
            format!("nesting deeper than {} levels (cyclic structure?)", max_depth),
        )
    }

    /// Prefix the path with an array index. Called while unwinding out of a container.
    pub fn at_index(mut self, index: usize) -> Self {
        self.path.insert(0, PathSegment::Index(index));
        self
    }

    /// Prefix the path with an object key.
    pub fn at_key(mut self, key: impl Into<String>) -> Self {
        self.path.insert(0, PathSegment::Key(key.into()));
        self
    }

    pub fn kind(&self) -> ConversionErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Rendered path of the offending element.
    pub fn path(&self) -> String {
        let mut out = String::from("$");
        for segment in &self.path {
            match segment {
                PathSegment::Index(i) => out.push_str(&format!("[{}]", i)),
                PathSegment::Key(k) if is_plain_identifier(k) => {
                    out.push('.');
                    out.push_str(k);
                }
                PathSegment::Key(k) => out.push_str(&format!("[{:?}]", k)),
            }
        }
        out
    }
}

fn is_plain_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conversion error at {}: {}", self.path(), self.message)
    }
}

impl std::error::Error for ConversionError {}

impl serde::ser::Error for ConversionError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::new(ConversionErrorKind::Custom, msg.to_string())
    }
}

impl serde::de::Error for ConversionError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::new(ConversionErrorKind::Custom, msg.to_string())
    }
}
