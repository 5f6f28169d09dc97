//! Utility functions

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{OrchestratorError, Result};

/// Version information for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Cooldown options for exponential backoff
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

/// Calculate exponential backoff delay
pub fn calc_exp_backoff(options: &CooldownOptions, attempt: u32) -> Duration {
    let delay_secs = options.base_delay.as_secs_f64() * options.multiplier.powi(attempt as i32);
    let capped_delay = delay_secs.min(options.max_delay.as_secs_f64());
    Duration::from_secs_f64(capped_delay)
}

/// Lowercase slug with non-ASCII letters transliterated (`café` becomes
/// `cafe`).
///
/// Used for compose project names and for directory names derived from
/// user-facing app names. A name with nothing left to keep is rejected.
pub fn slugify(input: &str) -> Result<String> {
    let slug = slug::slugify(input);
    if slug.is_empty() {
        return Err(OrchestratorError::InvalidApp(format!("invalid app name {:?}", input)));
    }
    Ok(slug)
}
