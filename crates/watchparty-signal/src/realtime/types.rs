//! Connection settings, Phoenix envelopes, and the event/command enums.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use watchparty_config::RealtimeSettings;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RealtimeConfig {
    pub project_ref: String,
    pub api_key: String,
    /// Signed-in user's JWT, sent with every channel join.
    pub access_token: Option<String>,
    pub heartbeat_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    pub max_reconnect_delay_secs: u64,
}

impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("project_ref", &self.project_ref)
            .field("api_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .finish_non_exhaustive()
    }
}

impl From<&RealtimeSettings> for RealtimeConfig {
    fn from(settings: &RealtimeSettings) -> Self {
        Self {
            project_ref: settings.project_ref.clone(),
            api_key: settings.api_key.clone(),
            access_token: None,
            heartbeat_interval_secs: settings.heartbeat_interval_secs,
            reconnect_delay_secs: settings.reconnect_delay_secs,
            max_reconnect_delay_secs: settings.max_reconnect_delay_secs,
        }
    }
}

impl RealtimeConfig {
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    pub(crate) fn ws_url(&self) -> String {
        format!(
            "wss://{}.supabase.co/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.project_ref, self.api_key
        )
    }

    /// Next reconnect delay after `current`, doubling up to the cap.
    pub(crate) fn next_backoff(&self, current: u64) -> u64 {
        current
            .saturating_mul(2)
            .max(1)
            .min(self.max_reconnect_delay_secs)
    }
}

// ---------------------------------------------------------------------------
// Phoenix envelope
// ---------------------------------------------------------------------------

static REF_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A Phoenix v1 JSON message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
    #[serde(rename = "ref")]
    pub msg_ref: Option<String>,
}

impl PhoenixMessage {
    /// Outgoing message with a fresh ref.
    pub fn new(topic: impl Into<String>, event: &str, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            event: event.to_string(),
            payload,
            msg_ref: Some(REF_COUNTER.fetch_add(1, Ordering::Relaxed).to_string()),
        }
    }

    /// Outgoing message on a short channel topic (adds the `realtime:` prefix).
    pub(crate) fn on_channel(topic: &str, event: &str, payload: serde_json::Value) -> Self {
        Self::new(format!("realtime:{topic}"), event, payload)
    }

    pub(crate) fn heartbeat() -> Self {
        Self::new("phoenix", "heartbeat", serde_json::json!({}))
    }
}

// ---------------------------------------------------------------------------
// Channel configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub broadcast: BroadcastConfig,
    pub presence: PresenceConfig,
}

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Receive our own broadcasts (Supabase `self`).
    pub self_send: bool,
    pub ack: bool,
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub key: String,
}

impl ChannelConfig {
    pub(crate) fn to_join_payload(&self, access_token: Option<&str>) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "config": {
                "broadcast": {
                    "self": self.broadcast.self_send,
                    "ack": self.broadcast.ack
                },
                "presence": {
                    "key": self.presence.key
                }
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = serde_json::Value::String(token.to_string());
        }
        payload
    }
}

// ---------------------------------------------------------------------------
// Events & commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    Connected,
    Disconnected,
    ChannelJoined {
        topic: String,
    },
    ChannelError {
        topic: String,
        message: String,
    },
    Broadcast {
        topic: String,
        event: String,
        payload: serde_json::Value,
    },
    /// Full presence snapshot, sent after a join.
    PresenceState {
        topic: String,
        state: HashMap<String, Vec<serde_json::Value>>,
    },
    PresenceDiff {
        topic: String,
        joins: HashMap<String, Vec<serde_json::Value>>,
        leaves: HashMap<String, Vec<serde_json::Value>>,
    },
    Error(String),
}

#[derive(Debug)]
pub(crate) enum RealtimeCommand {
    JoinChannel {
        topic: String,
        config: ChannelConfig,
    },
    LeaveChannel {
        topic: String,
    },
    Broadcast {
        topic: String,
        event: String,
        payload: serde_json::Value,
    },
    PresenceTrack {
        topic: String,
        payload: serde_json::Value,
    },
    PresenceUntrack {
        topic: String,
    },
    Disconnect,
}
