//! Run command - verify one configuration on the reference emulator

use anyhow::{Context, Result};
use clap::Parser;

use mm_conformance::args::{DomainArgs, EmulatorArgs, HarnessArgs};
use mm_conformance::emulator::ReferenceDevice;
use mm_conformance::ValidationHarness;

use super::output::format_report;
use super::parse_case;

#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Case path: "group/name"
    pub path: String,

    #[command(flatten)]
    pub harness: HarnessArgs,

    #[command(flatten)]
    pub domain: DomainArgs,

    #[command(flatten)]
    pub emulator: EmulatorArgs,
}

impl RunCmd {
    pub fn execute(&self, json_output: bool, verbose: bool) -> Result<()> {
        let case = parse_case(&self.path)?;
        let device = ReferenceDevice::new(self.emulator.to_config());
        let mut harness = ValidationHarness::new(device, self.harness.to_config());

        let report = harness
            .verify(&case, &self.domain.to_config())
            .with_context(|| format!("Verification of {} aborted", case.path()))?;

        if json_output {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print!("{}", format_report(&report, verbose));
        }

        report.ensure_passed()?;
        Ok(())
    }
}
