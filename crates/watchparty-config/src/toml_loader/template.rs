//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Watch party configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[ice]
# candidate_pool_size = 10   # 0-255
# Replacing `servers` replaces the whole list.
# [[ice.servers]]
# urls = ["stun:stun.l.google.com:19302"]
# [[ice.servers]]
# urls = ["turn:turn.example.com:443?transport=tcp"]
# username = "user"
# credential = "secret"

[negotiation]
# max_ice_restarts = 1       # 0-5
# restart_timeout_ms = 15000

[signaling]
# signal_ttl_secs = 120
# dedupe_window = 256
# channel_capacity = 256

[capture]
# video = true
# audio = true
# display_surface = "browser"  # browser, window, monitor

[chat]
# history_limit = 100

[realtime]
# project_ref = ""
# api_key = ""
# heartbeat_interval_secs = 25
# reconnect_delay_secs = 1
# max_reconnect_delay_secs = 30

[logging]
# level = "info"             # trace, debug, info, warn, error
"##
    .to_string()
}
