//! Run command implementation for Kiln CLI.
//!
//! Evaluates a script file as one global script.

use std::time::Instant;

use crate::RuntimeArgs;
use crate::output::{load_runtime, print_value, read_script, timeout};

/// Execute a script file.
pub fn execute(path: &str, args: &RuntimeArgs) -> anyhow::Result<()> {
    let source = read_script(path)?;
    let runtime = load_runtime(args)?;

    let start = Instant::now();
    let value = runtime.eval_named(path, &source, timeout(args))?;
    tracing::debug!(script = path, elapsed_ms = start.elapsed().as_millis() as u64, "script finished");

    print_value(&value)
}
