//! Kernel configuration.

use serde::Deserialize;

use crate::error::{KernelError, Result};

/// Environment variable that turns strict verification on or off.
pub const ENV_STRICT_VERIFICATION: &str = "BOOKCHAT_STRICT_VERIFICATION";

/// Environment variable that turns hash chaining on or off.
pub const ENV_CHAIN_INTEGRITY: &str = "BOOKCHAT_CHAIN_INTEGRITY";

/// Configuration for the kernel.
///
/// Embedding layers usually deserialize this from their own config file;
/// missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Reject `message` and `username_change` records that fail verification
    /// instead of appending them with an annotation.
    pub strict_verification: bool,
    /// Link every record to the digest of its predecessor.
    pub chain_integrity: bool,
    /// Records fetched per store round trip when scanning.
    pub scan_page_size: usize,
    /// Parallel tasks used by whole-log verification.
    pub verify_workers: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            strict_verification: false,
            chain_integrity: false,
            scan_page_size: 256,
            verify_workers: 4,
        }
    }
}

impl KernelConfig {
    /// Defaults, overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults, overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_STRICT_VERIFICATION) {
            config.strict_verification = parse_flag(ENV_STRICT_VERIFICATION, &value)?;
        }
        if let Some(value) = lookup(ENV_CHAIN_INTEGRITY) {
            config.chain_integrity = parse_flag(ENV_CHAIN_INTEGRITY, &value)?;
        }
        Ok(config)
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_verification = strict;
        self
    }

    pub fn chained(mut self, chained: bool) -> Self {
        self.chain_integrity = chained;
        self
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(KernelError::Config(format!(
            "{} must be a boolean, got {:?}",
            name, other
        ))),
    }
}
