//! Tests for the full validation pipeline.

use super::*;
use crate::schema::*;

#[test]
fn default_config_validates() {
    let config = WatchPartyConfig::default();
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_pool_size_too_large() {
    let mut config = WatchPartyConfig::default();
    config.ice.candidate_pool_size = 300;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("ice.candidate_pool_size"));
}

#[test]
fn catches_empty_server_list() {
    let mut config = WatchPartyConfig::default();
    config.ice.servers.clear();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("at least one server"));
}

#[test]
fn catches_bad_url_scheme() {
    let mut config = WatchPartyConfig::default();
    config.ice.servers = vec![IceServerConfig::stun("https://stun.example.org")];
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("ice.servers[0]"));
}

#[test]
fn catches_turn_without_credentials() {
    let mut config = WatchPartyConfig::default();
    config.ice.servers = vec![IceServerConfig {
        urls: vec!["turn:turn.example.org:3478".into()],
        username: Some("user".into()),
        credential: None,
    }];
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("needs username and credential"));
}

#[test]
fn catches_too_many_restarts() {
    let mut config = WatchPartyConfig::default();
    config.negotiation.max_ice_restarts = 9;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("negotiation.max_ice_restarts"));
}

#[test]
fn zero_restarts_is_allowed() {
    let mut config = WatchPartyConfig::default();
    config.negotiation.max_ice_restarts = 0;
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_zero_timeouts_and_capacities() {
    let mut config = WatchPartyConfig::default();
    config.negotiation.restart_timeout_ms = 0;
    config.signaling.signal_ttl_secs = 0;
    config.signaling.channel_capacity = 0;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("negotiation.restart_timeout_ms"));
    assert!(err.contains("signaling.signal_ttl_secs"));
    assert!(err.contains("signaling.channel_capacity"));
}

#[test]
fn catches_capture_with_nothing_requested() {
    let mut config = WatchPartyConfig::default();
    config.capture.video = false;
    config.capture.audio = false;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("capture"));
}

#[test]
fn catches_inverted_reconnect_delays() {
    let mut config = WatchPartyConfig::default();
    config.realtime.reconnect_delay_secs = 10;
    config.realtime.max_reconnect_delay_secs = 5;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("realtime.max_reconnect_delay_secs"));
}

#[test]
fn collects_multiple_errors() {
    let mut config = WatchPartyConfig::default();
    config.chat.history_limit = 0;
    config.realtime.heartbeat_interval_secs = 1;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("chat.history_limit"));
    assert!(err.contains("realtime.heartbeat_interval_secs"));
    assert!(err.contains("; "));
}
