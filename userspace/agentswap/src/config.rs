// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hot-swap engine configuration loaded from TOML.
//!
//! ```toml
//! bank_capacity = 14336
//! watchdog_timeout_ms = 30000
//! write_budget_ms = 1000
//!
//! [budget]
//! max_flash_bytes = 32768
//! max_sram_bytes = 4096
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::manifest::FootprintBudget;
use crate::slot::TRAILER_LEN;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Config text is not valid TOML for this schema.
    #[error("failed to parse config {origin}: {source}")]
    Parse {
        /// File path or `<inline>`.
        origin: String,
        /// Parse failure.
        #[source]
        source: toml::de::Error,
    },
    /// Values parsed but violate a constraint.
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Engine tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwapConfig {
    /// Size of each bank including its metadata trailer.
    #[serde(default = "default_bank_capacity")]
    pub bank_capacity: usize,
    /// Maximum lifetime of an in-flight update before the watchdog rolls back.
    #[serde(default = "default_watchdog_timeout_ms")]
    pub watchdog_timeout_ms: u64,
    /// Real-time budget for one bank write.
    #[serde(default = "default_write_budget_ms")]
    pub write_budget_ms: u64,
    /// Declared-footprint limits.
    #[serde(default)]
    pub budget: FootprintBudget,
}

fn default_bank_capacity() -> usize {
    14 * 1024
}

fn default_watchdog_timeout_ms() -> u64 {
    30_000
}

fn default_write_budget_ms() -> u64 {
    1_000
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            bank_capacity: default_bank_capacity(),
            watchdog_timeout_ms: default_watchdog_timeout_ms(),
            write_budget_ms: default_write_budget_ms(),
            budget: FootprintBudget::default(),
        }
    }
}

impl SwapConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)
            .map_err(|source| ConfigError::Parse { origin: "<inline>".into(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: Self = toml::from_str(&data)
            .map_err(|source| ConfigError::Parse { origin: path.display().to_string(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bank_capacity <= TRAILER_LEN {
            return Err(ConfigError::Invalid("bank_capacity must exceed the metadata trailer"));
        }
        if u32::try_from(self.bank_capacity).is_err() {
            return Err(ConfigError::Invalid("bank_capacity must fit in 32 bits"));
        }
        if self.watchdog_timeout_ms == 0 {
            return Err(ConfigError::Invalid("watchdog_timeout_ms must be non-zero"));
        }
        if self.write_budget_ms == 0 || self.write_budget_ms > self.watchdog_timeout_ms {
            return Err(ConfigError::Invalid(
                "write_budget_ms must be non-zero and within the watchdog timeout",
            ));
        }
        Ok(())
    }

    /// Largest payload a bank can hold.
    pub fn payload_capacity(&self) -> usize {
        self.bank_capacity.saturating_sub(TRAILER_LEN)
    }
}
