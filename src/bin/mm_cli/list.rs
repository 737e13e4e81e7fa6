//! List command - stream the paths of legal configurations

use std::io::Write;

use anyhow::Result;
use clap::Parser;

use mm_conformance::args::SelectionArgs;
use mm_conformance::config_space::enumerate;

#[derive(Parser, Debug)]
pub struct ListCmd {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Print only the number of matching configurations
    #[arg(long, default_value_t = false)]
    pub count: bool,
}

impl ListCmd {
    pub fn execute(&self, json_output: bool) -> Result<()> {
        let axes = self.selection.axes();
        let cases = enumerate(&axes).filter(|case| self.selection.matches(case));

        if self.count {
            let count = cases.count();
            if json_output {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({ "count": count }))?
                );
            } else {
                println!("{}", count);
            }
            return Ok(());
        }

        if json_output {
            let paths: Vec<String> = cases.map(|case| case.path()).collect();
            println!("{}", serde_json::to_string_pretty(&paths)?);
            return Ok(());
        }

        let mut out = std::io::stdout().lock();
        for case in cases {
            writeln!(out, "{}", case.path())?;
        }
        Ok(())
    }
}
