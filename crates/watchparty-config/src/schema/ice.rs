//! ICE server configuration.

use serde::{Deserialize, Serialize};

/// One STUN or TURN endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(url: &str, username: &str, credential: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: Some(username.to_string()),
            credential: Some(credential.to_string()),
        }
    }

    /// Whether any URL of this entry is a relay (TURN) endpoint.
    pub fn is_turn(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

/// ICE configuration handed to every peer connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub servers: Vec<IceServerConfig>,
    /// Candidates gathered ahead of negotiation (0-255).
    pub candidate_pool_size: u32,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec![
                IceServerConfig::stun("stun:stun.l.google.com:19302"),
                IceServerConfig::stun("stun:stun1.l.google.com:19302"),
                IceServerConfig::stun("stun:stun2.l.google.com:19302"),
                IceServerConfig::stun("stun:stun3.l.google.com:19302"),
                IceServerConfig::stun("stun:stun4.l.google.com:19302"),
                IceServerConfig::turn(
                    "turn:openrelay.metered.ca:80",
                    "openrelayproject",
                    "openrelayproject",
                ),
                IceServerConfig::turn(
                    "turn:openrelay.metered.ca:443",
                    "openrelayproject",
                    "openrelayproject",
                ),
                IceServerConfig::turn(
                    "turn:openrelay.metered.ca:443?transport=tcp",
                    "openrelayproject",
                    "openrelayproject",
                ),
            ],
            candidate_pool_size: 10,
        }
    }
}
