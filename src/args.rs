//! Command-line argument groups shared by the `mm-conformance` subcommands.
//!
//! Each group maps onto one configuration struct; flags left unset keep the
//! struct's environment-aware defaults.

use std::time::Duration;

use clap::Args;

use mm_conformance_core::config_space::AxisSet;
use mm_conformance_core::domain::{DomainConfig, DEFAULT_DIM, DEFAULT_WORKGROUPS_PER_DIM};
use mm_conformance_core::harness::HarnessConfig;
use mm_emulator::{Capabilities, ReferenceConfig};
use mm_types::{CaseDef, Family};

/// Parse a registration group name into its family.
pub fn parse_family(value: &str) -> Result<Family, String> {
    [
        Family::MessagePassing,
        Family::WriteAfterRead,
        Family::Transitive,
    ]
    .into_iter()
    .find(|family| family.group_name() == value)
    .ok_or_else(|| {
        format!(
            "unknown group '{}' (expected message_passing, write_after_read or transitive)",
            value
        )
    })
}

#[derive(Debug, Clone, Default, Args)]
pub struct HarnessArgs {
    /// Rounds of dispatches per configuration [env: MM_CONFORMANCE_ROUNDS]
    #[arg(long)]
    pub rounds: Option<u32>,

    /// Dispatches per round [env: MM_CONFORMANCE_ITERATIONS]
    #[arg(long)]
    pub iterations: Option<u32>,

    /// Per-submission timeout in milliseconds [env: MM_CONFORMANCE_TIMEOUT_MS]
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

impl HarnessArgs {
    pub fn to_config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::from_env();
        if let Some(rounds) = self.rounds {
            config = config.with_rounds(rounds);
        }
        if let Some(iterations) = self.iterations {
            config = config.with_iterations_per_round(iterations);
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_dispatch_timeout(Duration::from_millis(ms));
        }
        config
    }
}

#[derive(Debug, Clone, Args)]
pub struct DomainArgs {
    /// Invocations along each side of a workgroup tile
    #[arg(long, default_value_t = DEFAULT_DIM)]
    pub dim: u32,

    /// Workgroups along each side of the dispatch
    #[arg(long, default_value_t = DEFAULT_WORKGROUPS_PER_DIM)]
    pub workgroups: u32,

    /// Local x coordinate of the transitive leader
    #[arg(long, default_value_t = 0)]
    pub leader_x: u32,

    /// Local y coordinate of the transitive leader
    #[arg(long, default_value_t = 0)]
    pub leader_y: u32,
}

impl Default for DomainArgs {
    fn default() -> Self {
        Self {
            dim: DEFAULT_DIM,
            workgroups: DEFAULT_WORKGROUPS_PER_DIM,
            leader_x: 0,
            leader_y: 0,
        }
    }
}

impl DomainArgs {
    pub fn to_config(&self) -> DomainConfig {
        DomainConfig::default()
            .with_dim(self.dim)
            .with_workgroups_per_dim(self.workgroups)
            .with_leader(self.leader_x, self.leader_y)
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct EmulatorArgs {
    /// Scheduler seed [env: MM_EMULATOR_SEED]
    #[arg(long)]
    pub seed: Option<u64>,

    /// Subgroup width, rounded down to a power of two [env: MM_EMULATOR_SUBGROUP_SIZE]
    #[arg(long)]
    pub subgroup_size: Option<u32>,

    /// Largest workgroup the emulated device accepts
    #[arg(long)]
    pub max_workgroup_invocations: Option<u32>,

    /// Emulate a device without the Vulkan memory model extension
    #[arg(long, default_value_t = false)]
    pub legacy_device: bool,
}

impl EmulatorArgs {
    pub fn to_config(&self) -> ReferenceConfig {
        let mut config = ReferenceConfig::from_env();
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if let Some(size) = self.subgroup_size {
            config = config.with_subgroup_size(size);
        }
        if let Some(max) = self.max_workgroup_invocations {
            config = config.with_max_workgroup_invocations(max);
        }
        if self.legacy_device {
            config = config.with_capabilities(Capabilities::legacy_only());
        }
        config
    }
}

/// Which configurations a listing or sweep walks.
#[derive(Debug, Clone, Default, Args)]
pub struct SelectionArgs {
    /// Restrict to one group (message_passing, write_after_read, transitive)
    #[arg(long, value_parser = parse_family)]
    pub group: Option<Family>,

    /// Only the legacy-model mustpass subset
    #[arg(long, default_value_t = false)]
    pub legacy_only: bool,

    /// Only paths containing this substring
    #[arg(long, value_name = "SUBSTRING")]
    pub filter: Option<String>,
}

impl SelectionArgs {
    pub fn axes(&self) -> AxisSet {
        let axes = if self.legacy_only {
            AxisSet::mustpass_legacy()
        } else {
            AxisSet::default()
        };
        match self.group {
            Some(family) => axes.for_family(family),
            None => axes,
        }
    }

    pub fn matches(&self, case: &CaseDef) -> bool {
        match &self.filter {
            Some(filter) => case.path().contains(filter.as_str()),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct ArgsUnderTest {
        #[command(flatten)]
        harness: HarnessArgs,
        #[command(flatten)]
        domain: DomainArgs,
        #[command(flatten)]
        selection: SelectionArgs,
    }

    #[test]
    fn test_flags_map_onto_configs() {
        let parsed = ArgsUnderTest::parse_from([
            "mm-conformance",
            "--rounds",
            "2",
            "--iterations",
            "7",
            "--dim",
            "4",
            "--workgroups",
            "3",
            "--group",
            "write_after_read",
        ]);
        let harness = parsed.harness.to_config();
        assert_eq!(harness.rounds, 2);
        assert_eq!(harness.iterations_per_round, 7);

        let domain = parsed.domain.to_config();
        assert_eq!(domain.dim, 4);
        assert_eq!(domain.workgroups_per_dim, 3);

        assert_eq!(parsed.selection.group, Some(Family::WriteAfterRead));
    }

    #[test]
    fn test_unknown_group_is_rejected() {
        assert!(parse_family("atomics").is_err());
        assert!(ArgsUnderTest::try_parse_from(["mm-conformance", "--group", "atomics"]).is_err());
    }

    #[test]
    fn test_filter_matches_substring() {
        let selection = SelectionArgs {
            filter: Some("scope_device".to_string()),
            ..Default::default()
        };
        assert!(selection.matches(&CaseDef::default()));
        let selection = SelectionArgs {
            filter: Some("scope_subgroup".to_string()),
            ..Default::default()
        };
        assert!(!selection.matches(&CaseDef::default()));
    }
}
