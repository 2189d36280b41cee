//! Configuration schema types.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod capture;
mod ice;
mod negotiation;
mod realtime;
mod signaling;
mod system;

pub use capture::*;
pub use ice::*;
pub use negotiation::*;
pub use realtime::*;
pub use signaling::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct WatchPartyConfig {
    pub ice: IceConfig,
    pub negotiation: NegotiationConfig,
    pub signaling: SignalingConfig,
    pub capture: CaptureConfig,
    pub chat: ChatConfig,
    pub realtime: RealtimeSettings,
    pub logging: LoggingConfig,
}
