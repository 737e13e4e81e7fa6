//! Environment variable parsing shared by the harness and backends.
//!
//! Replaces the repeated pattern:
//!
//! ```ignore
//! std::env::var("MM_CONFORMANCE_ROUNDS")
//!     .ok()
//!     .and_then(|v| v.trim().parse::<u32>().ok())
//!     .unwrap_or(default)
//! ```
//!
//! # Example
//!
//! ```
//! use mm_conformance_core::env_utils::{env_var, env_var_or};
//!
//! let rounds: u32 = env_var_or("MM_CONFORMANCE_ROUNDS", 4);
//! let seed: Option<u64> = env_var("MM_EMULATOR_SEED");
//! ```

use std::str::FromStr;

/// Parse an environment variable, ignoring surrounding whitespace.
///
/// Returns `None` if the variable is not set or cannot be parsed.
pub fn env_var<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse an environment variable with a default value.
pub fn env_var_or<T: FromStr>(key: &str, default: T) -> T {
    env_var(key).unwrap_or(default)
}
