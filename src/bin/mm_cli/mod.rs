//! CLI subcommand implementations for mm-conformance

pub mod list;
pub mod output;
pub mod run;
pub mod show;
pub mod sweep;

use anyhow::{Context, Result};
use mm_types::CaseDef;

/// Parse a `group/name` argument.
pub fn parse_case(path: &str) -> Result<CaseDef> {
    path.parse::<CaseDef>()
        .with_context(|| format!("Invalid case path '{}'", path))
}
