//! Call command implementation for Kiln CLI.

use kiln_core::Value;

use crate::RuntimeArgs;
use crate::output::{load_runtime, print_value, timeout};

/// Call the global function `name` with `raw_args` and print the result.
pub fn execute(name: &str, raw_args: &[String], args: &RuntimeArgs) -> anyhow::Result<()> {
    let runtime = load_runtime(args)?;
    let call_args: Vec<Value> = raw_args.iter().map(|arg| parse_arg(arg)).collect();
    let value = runtime.call(name, &call_args, timeout(args))?;
    print_value(&value)
}

/// Parse one argument as JSON. Anything that is not valid JSON is passed as a string.
fn parse_arg(arg: &str) -> Value {
    serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string()))
}
