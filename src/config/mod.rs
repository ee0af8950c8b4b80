//! Configuration
//!
//! Layered configuration for the cache and its ambient services. Layers, lowest
//! precedence first: built-in defaults, the global file, an explicit file, then
//! `CANOPY_*` environment variables.

pub mod facade;
pub mod merge;
pub mod paths;
pub mod sources;

pub use facade::ConfigLoader;

use crate::error::CacheError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};

/// Largest accepted activity window
pub const MAX_ACTIVITY_PERIOD_MONTHS: u32 = 120;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanopyConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CanopyConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        self.cache.validate()
    }
}

/// Cache construction settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Deepest allowed node depth (root = 0)
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    #[serde(default = "default_true")]
    pub post_counts_enabled: bool,

    #[serde(default = "default_true")]
    pub activity_enabled: bool,

    #[serde(default = "default_true")]
    pub file_stats_enabled: bool,

    /// Length of one activity window in months
    #[serde(default = "default_period_months")]
    pub activity_period_months: u32,
}

fn default_max_depth() -> u32 {
    2
}

fn default_period_months() -> u32 {
    12
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            post_counts_enabled: true,
            activity_enabled: true,
            file_stats_enabled: true,
            activity_period_months: default_period_months(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_depth == 0 {
            return Err(CacheError::Config(
                "cache.max_depth must be at least 1".to_string(),
            ));
        }
        if self.activity_period_months == 0
            || self.activity_period_months > MAX_ACTIVITY_PERIOD_MONTHS
        {
            return Err(CacheError::Config(format!(
                "cache.activity_period_months must be between 1 and {}, got {}",
                MAX_ACTIVITY_PERIOD_MONTHS, self.activity_period_months
            )));
        }
        Ok(())
    }
}
