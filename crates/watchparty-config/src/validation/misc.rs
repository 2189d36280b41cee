//! Validation for the smaller sections: negotiation, signaling, capture,
//! chat and realtime.

use crate::schema::WatchPartyConfig;

use super::helpers::{validate_non_zero, validate_range};

pub(crate) fn validate_negotiation(errors: &mut Vec<String>, config: &WatchPartyConfig) {
    validate_range(
        errors,
        "negotiation.max_ice_restarts",
        u64::from(config.negotiation.max_ice_restarts),
        0,
        5,
    );
    validate_non_zero(
        errors,
        "negotiation.restart_timeout_ms",
        config.negotiation.restart_timeout_ms,
    );
}

pub(crate) fn validate_signaling(errors: &mut Vec<String>, config: &WatchPartyConfig) {
    validate_non_zero(
        errors,
        "signaling.signal_ttl_secs",
        config.signaling.signal_ttl_secs,
    );
    validate_non_zero(
        errors,
        "signaling.dedupe_window",
        config.signaling.dedupe_window as u64,
    );
    validate_non_zero(
        errors,
        "signaling.channel_capacity",
        config.signaling.channel_capacity as u64,
    );
}

pub(crate) fn validate_capture(errors: &mut Vec<String>, config: &WatchPartyConfig) {
    if !config.capture.video && !config.capture.audio {
        errors.push("capture must request video, audio or both".into());
    }
}

pub(crate) fn validate_chat(errors: &mut Vec<String>, config: &WatchPartyConfig) {
    validate_range(
        errors,
        "chat.history_limit",
        config.chat.history_limit as u64,
        1,
        1000,
    );
}

pub(crate) fn validate_realtime(errors: &mut Vec<String>, config: &WatchPartyConfig) {
    let rt = &config.realtime;
    validate_range(
        errors,
        "realtime.heartbeat_interval_secs",
        rt.heartbeat_interval_secs,
        5,
        60,
    );
    validate_non_zero(
        errors,
        "realtime.reconnect_delay_secs",
        rt.reconnect_delay_secs,
    );
    if rt.max_reconnect_delay_secs < rt.reconnect_delay_secs {
        errors.push(format!(
            "realtime.max_reconnect_delay_secs = {} is below reconnect_delay_secs = {}",
            rt.max_reconnect_delay_secs, rt.reconnect_delay_secs
        ));
    }
}
