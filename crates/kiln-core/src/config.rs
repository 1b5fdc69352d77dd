//! Runtime configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::marshal::DEFAULT_MAX_DEPTH;

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Engine heap limit in bytes. `None` leaves the engine default (unlimited).
    pub memory_limit: Option<usize>,

    /// Engine stack limit in bytes. `None` leaves the engine default.
    pub max_stack_size: Option<usize>,

    /// Maximum nesting depth when marshaling values in either direction.
    pub max_depth: usize,

    /// Timeout applied to `eval`/`call` when the caller passes none.
    /// `None` means calls without an explicit timeout run unbounded.
    pub default_timeout_ms: Option<u64>,

    /// Evaluate scripts in strict mode.
    pub strict: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            max_stack_size: None,
            max_depth: DEFAULT_MAX_DEPTH,
            default_timeout_ms: None,
            strict: false,
        }
    }
}

impl RuntimeConfig {
    /// Config where every call is bounded by `timeout` unless overridden.
    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout_ms: Some(millis(timeout)),
            ..Default::default()
        }
    }

    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    /// The explicit timeout if given, else the configured default.
    pub fn effective_timeout(&self, explicit: Option<Duration>) -> Option<Duration> {
        explicit.or_else(|| self.default_timeout())
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
