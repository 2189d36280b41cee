//! ICE server list validation.

use crate::schema::WatchPartyConfig;

use super::helpers::validate_range;

const ALLOWED_SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];

pub(crate) fn validate_ice(errors: &mut Vec<String>, config: &WatchPartyConfig) {
    validate_range(
        errors,
        "ice.candidate_pool_size",
        u64::from(config.ice.candidate_pool_size),
        0,
        255,
    );

    if config.ice.servers.is_empty() {
        errors.push("ice.servers must list at least one server".into());
    }

    for (i, server) in config.ice.servers.iter().enumerate() {
        if server.urls.is_empty() {
            errors.push(format!("ice.servers[{i}].urls is empty"));
        }
        for url in &server.urls {
            if !ALLOWED_SCHEMES.iter().any(|s| url.starts_with(s)) {
                errors.push(format!(
                    "ice.servers[{i}] url '{url}' must start with stun:, stuns:, turn: or turns:"
                ));
            }
        }
        if server.is_turn() {
            let missing_user = server.username.as_deref().map_or(true, str::is_empty);
            let missing_cred = server.credential.as_deref().map_or(true, str::is_empty);
            if missing_user || missing_cred {
                errors.push(format!(
                    "ice.servers[{i}] is a TURN server and needs username and credential"
                ));
            }
        }
    }
}
