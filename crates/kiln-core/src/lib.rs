//! Embedded JavaScript runtime for Kiln.
//!
//! This crate provides:
//! - A persistent engine context with an optional preload script
//! - Evaluation of scripts and calls to global functions
//! - Bidirectional value marshaling between host and engine
//! - Per-call deadlines enforced by a watchdog thread

pub mod config;
pub mod engine;
pub mod error;
pub mod marshal;
pub mod runtime;
pub mod value;
pub mod watchdog;

pub use config::RuntimeConfig;
pub use error::{ConversionError, ConversionErrorKind, Error, Result};
pub use marshal::DEFAULT_MAX_DEPTH;
pub use runtime::{Runtime, RuntimeBuilder};
pub use value::{Key, Map, Value, from_value, to_value};
