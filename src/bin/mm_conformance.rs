//! mm-conformance: memory-model conformance CLI
//!
//! Enumerates, synthesizes and verifies GPU memory-model synchronization
//! protocols against the CPU reference emulator.
//!
//! ## Commands
//!
//! - **list**: Stream the paths of legal configurations
//! - **show**: Print the program synthesized for one configuration
//! - **run**: Verify one configuration
//! - **sweep**: Verify many configurations in parallel
//!
//! ## Example Usage
//!
//! ```bash
//! # Count the legacy mustpass subset
//! mm-conformance list --legacy-only --count
//!
//! # Print the GLSL for a configuration
//! mm-conformance show message_passing/coherent_fence_fence_payload_local_buffer_guard_local_buffer_scope_device_comp
//!
//! # Verify it on a small domain
//! mm-conformance run message_passing/coherent_fence_fence_payload_local_buffer_guard_local_buffer_scope_device_comp --dim 8 --workgroups 2
//!
//! # Sweep every 10th write-after-read case and keep a JSON summary
//! mm-conformance sweep --group write_after_read --stride 10 --output summary.json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod mm_cli;

use mm_cli::list::ListCmd;
use mm_cli::run::RunCmd;
use mm_cli::show::ShowCmd;
use mm_cli::sweep::SweepCmd;

#[derive(Parser)]
#[command(
    name = "mm-conformance",
    author,
    version,
    about = "Memory-model conformance: enumerate, synthesize and verify synchronization protocols",
    long_about = "Enumerates every legal memory-model synchronization configuration, synthesizes\n\
                  a GLSL program for it and stress-verifies the program on the CPU reference\n\
                  emulator. RUST_LOG overrides the log filter."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON instead of human-readable format
    #[arg(long, global = true)]
    json: bool,

    /// Show detailed output and debug logs
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List legal configurations
    List(ListCmd),

    /// Print the synthesized program for a configuration
    Show(ShowCmd),

    /// Verify one configuration on the reference emulator
    Run(RunCmd),

    /// Verify many configurations in parallel
    Sweep(SweepCmd),
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let Cli {
        command,
        json,
        verbose,
    } = Cli::parse();
    init_logging(verbose);

    let result = match command {
        Commands::List(cmd) => cmd.execute(json),
        Commands::Show(cmd) => cmd.execute(json, verbose),
        Commands::Run(cmd) => cmd.execute(json, verbose),
        Commands::Sweep(cmd) => cmd.execute(json, verbose),
    };

    if let Err(err) = &result {
        eprint!("{}", mm_cli::output::format_error(err, json));
        std::process::exit(1);
    }
    Ok(())
}
