//! Full configuration validation.
//!
//! Each domain has its own submodule; this orchestrator calls them all
//! and collects errors into a single `ConfigError`.

mod helpers;
mod ice;
mod misc;

#[cfg(test)]
mod tests;

use crate::schema::WatchPartyConfig;
use watchparty_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &WatchPartyConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    ice::validate_ice(&mut errors, config);
    misc::validate_negotiation(&mut errors, config);
    misc::validate_signaling(&mut errors, config);
    misc::validate_capture(&mut errors, config);
    misc::validate_chat(&mut errors, config);
    misc::validate_realtime(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
