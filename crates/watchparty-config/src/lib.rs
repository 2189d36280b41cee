//! Watch-party configuration.
//!
//! TOML-based configuration with validation. Every section uses serde
//! defaults, so a partial (or empty) config file is valid.
//!
//! ```rust,no_run
//! use watchparty_config::{load_config, config_to_json};
//!
//! let config = load_config().expect("failed to load config");
//! println!("{}", config_to_json(&config));
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    CaptureConfig, ChatConfig, DisplaySurface, IceConfig, IceServerConfig, LogLevel,
    LoggingConfig, NegotiationConfig, RealtimeSettings, SignalingConfig, WatchPartyConfig,
    CONFIG_SCHEMA_VERSION,
};

use watchparty_common::ConfigError;

/// Load config from the platform default path and validate it.
///
/// Creates a commented default file on first run.
pub fn load_config() -> Result<WatchPartyConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &WatchPartyConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
