//! Sweep command - verify many configurations in parallel

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use mm_conformance::args::{DomainArgs, EmulatorArgs, HarnessArgs, SelectionArgs};
use mm_conformance::config_space::enumerate;
use mm_conformance::sweep::{run_sweep, SweepOptions};
use mm_conformance::CaseDef;

use super::output::format_summary;

#[derive(Parser, Debug)]
pub struct SweepCmd {
    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub harness: HarnessArgs,

    #[command(flatten)]
    pub domain: DomainArgs,

    #[command(flatten)]
    pub emulator: EmulatorArgs,

    /// Verify only every Nth matching configuration
    #[arg(long, default_value_t = 1)]
    pub stride: usize,

    /// Stop after this many configurations
    #[arg(long)]
    pub limit: Option<usize>,

    /// Worker threads (default: one per core)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Write the JSON summary to this file
    #[arg(long, short, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

impl SweepCmd {
    pub fn execute(&self, json_output: bool, verbose: bool) -> Result<()> {
        let axes = self.selection.axes();
        let cases: Vec<CaseDef> = enumerate(&axes)
            .filter(|case| self.selection.matches(case))
            .step_by(self.stride.max(1))
            .take(self.limit.unwrap_or(usize::MAX))
            .collect();
        if cases.is_empty() {
            bail!("No configurations match the selection");
        }

        let options = SweepOptions {
            harness: self.harness.to_config(),
            domain: self.domain.to_config(),
            emulator: self.emulator.to_config(),
            threads: self.threads,
        };
        let summary = run_sweep(&cases, &options)?;

        if let Some(path) = &self.output {
            std::fs::write(path, serde_json::to_string_pretty(&summary)?)
                .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        }

        if json_output {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print!("{}", format_summary(&summary, verbose));
        }

        if !summary.is_success() {
            bail!(
                "{} configuration(s) failed, {} aborted",
                summary.failed,
                summary.fatal
            );
        }
        Ok(())
    }
}
