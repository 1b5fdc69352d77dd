//! Kiln CLI - run JavaScript in an embedded engine from the command line.

mod call;
mod eval;
mod output;
mod run;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Embedded JavaScript runtime")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Options shared by every command that builds a runtime.
#[derive(Args, Debug, Clone, Default)]
pub struct RuntimeArgs {
    /// Abort the script after this many milliseconds
    #[arg(long, value_name = "N")]
    pub timeout_ms: Option<u64>,

    /// Script evaluated once before the command runs
    #[arg(long, value_name = "FILE")]
    pub preload: Option<String>,

    /// Runtime config as JSON (memory_limit, max_stack_size, max_depth, ...)
    #[arg(long, value_name = "FILE")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a script and print its completion value as JSON
    Eval {
        /// JavaScript source
        source: String,

        #[command(flatten)]
        runtime: RuntimeArgs,
    },

    /// Call a global function and print its result as JSON
    Call {
        /// Name of the global function
        name: String,

        /// Arguments, each parsed as JSON (plain text becomes a string)
        #[arg(allow_negative_numbers = true)]
        args: Vec<String>,

        #[command(flatten)]
        runtime: RuntimeArgs,
    },

    /// Evaluate a script file and print its completion value as JSON
    Run {
        /// Path to the script
        file: String,

        #[command(flatten)]
        runtime: RuntimeArgs,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format kiln-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(kiln_err) = err.downcast_ref::<kiln_core::Error>() {
            anyhow::anyhow!("{}", kiln_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Eval { source, runtime } => eval::execute(&source, &runtime).map_err(format_error)?,

        Commands::Call {
            name,
            args,
            runtime,
        } => call::execute(&name, &args, &runtime).map_err(format_error)?,

        Commands::Run { file, runtime } => run::execute(&file, &runtime).map_err(format_error)?,
    }

    Ok(())
}
