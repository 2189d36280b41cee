//! Negotiation and recovery policy.

use serde::{Deserialize, Serialize};

/// How hard a connection tries to recover from ICE failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Automatic ICE restarts per connection before failure is terminal (0-5).
    pub max_ice_restarts: u32,
    /// Time a restart has to reach `connected`, in milliseconds.
    pub restart_timeout_ms: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_ice_restarts: 1,
            restart_timeout_ms: 15_000,
        }
    }
}
