//! Eval command implementation for Kiln CLI.

use crate::RuntimeArgs;
use crate::output::{load_runtime, print_value, timeout};

/// Evaluate `source` and print the result.
pub fn execute(source: &str, args: &RuntimeArgs) -> anyhow::Result<()> {
    let runtime = load_runtime(args)?;
    let value = runtime.eval(source, timeout(args))?;
    print_value(&value)
}
