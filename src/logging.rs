//! Tracing subscriber setup
//!
//! `RUST_LOG` wins when set; otherwise the settings' `log_level` applies.

use tracing_subscriber::EnvFilter;

use crate::error::{Result, WeirError};
use crate::settings::Settings;

/// Install the global fmt subscriber.
///
/// Returns `false` when a subscriber was already installed (a host
/// application or an earlier call), which is not an error.
pub fn init(default_level: &str) -> Result<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level).map_err(|e| WeirError::Settings {
            reason: format!("Invalid log_level '{}': {}", default_level, e),
        })?,
    };

    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok())
}

/// [`init`] with the level from settings
pub fn init_from_settings(settings: &Settings) -> Result<bool> {
    init(&settings.log_level)
}
