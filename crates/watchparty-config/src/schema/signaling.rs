//! Signal relay and party chat settings.

use serde::{Deserialize, Serialize};

/// Signal relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Signals older than this are discarded on delivery and swept by the host.
    pub signal_ttl_secs: u64,
    /// How many recently seen signal ids are remembered to drop redeliveries.
    pub dedupe_window: usize,
    /// Capacity of the internal event channels.
    pub channel_capacity: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            signal_ttl_secs: 120,
            dedupe_window: 256,
            channel_capacity: 256,
        }
    }
}

/// Party chat settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub history_limit: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { history_limit: 100 }
    }
}
