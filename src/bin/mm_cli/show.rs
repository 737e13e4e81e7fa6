//! Show command - print the program synthesized for one configuration

use anyhow::{Context, Result};
use clap::Parser;

use mm_conformance::args::DomainArgs;
use mm_conformance::domain::TargetLimits;
use mm_conformance::synth::synthesize;

use super::output::format_program;
use super::parse_case;

#[derive(Parser, Debug)]
pub struct ShowCmd {
    /// Case path: "group/name"
    pub path: String,

    #[command(flatten)]
    pub domain: DomainArgs,
}

impl ShowCmd {
    pub fn execute(&self, json_output: bool, verbose: bool) -> Result<()> {
        let case = parse_case(&self.path)?;
        let domain = self
            .domain
            .to_config()
            .resolve(case.stage, &TargetLimits::default())?;
        let program = synthesize(&case, &domain)
            .with_context(|| format!("Failed to synthesize {}", case.path()))?;

        if json_output {
            println!("{}", serde_json::to_string_pretty(&program.text)?);
        } else {
            print!("{}", format_program(&program.text, verbose));
        }
        Ok(())
    }
}
