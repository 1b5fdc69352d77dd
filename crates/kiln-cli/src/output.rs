//! Runtime construction and result printing shared by the commands.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use kiln_core::{Runtime, RuntimeConfig, Value};

use crate::RuntimeArgs;

/// Build a runtime from the command-line options.
pub fn load_runtime(args: &RuntimeArgs) -> anyhow::Result<Runtime> {
    let config = match &args.config {
        Some(path) => {
            let json = read_script(path).context("Failed to read runtime config")?;
            RuntimeConfig::from_json(&json)?
        }
        None => RuntimeConfig::default(),
    };

    let preload = match &args.preload {
        Some(path) => Some(read_script(path)?),
        None => None,
    };

    tracing::debug!(?config, preload = args.preload.as_deref(), "creating runtime");
    Ok(Runtime::with_config(config, preload.as_deref())?)
}

/// Read a script or config file, failing with a readable message if it is missing.
pub fn read_script(path: &str) -> anyhow::Result<String> {
    if !Path::new(path).exists() {
        anyhow::bail!("File not found: {}", path);
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))
}

pub fn timeout(args: &RuntimeArgs) -> Option<Duration> {
    args.timeout_ms.map(Duration::from_millis)
}

/// Print a value to stdout as pretty JSON.
pub fn print_value(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
