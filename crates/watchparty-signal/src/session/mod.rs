//! One user's membership in one watch-party room.
//!
//! [`PartySession`] joins the room, picks the host or guest controller,
//! and runs a single event loop that feeds it roster changes, incoming
//! signals, connection events, room updates and chat.

mod party;

use std::sync::Arc;

use watchparty_config::WatchPartyConfig;

use crate::capture::ScreenCapture;
use crate::chat::ChatMessage;
use crate::directory::RoomDirectory;
use crate::identity::Identity;
use crate::peer::{ConnectionState, Role};
use crate::protocol::{Participant, Room};
use crate::transport::{RemoteTrack, TransportFactory};

pub use party::{PartySession, RECENT_PARTIES};

/// Backends a session runs on.
#[derive(Clone)]
pub struct PartyDeps {
    pub directory: Arc<dyn RoomDirectory>,
    pub transports: Arc<dyn TransportFactory>,
    pub capture: Arc<dyn ScreenCapture>,
    pub config: WatchPartyConfig,
}

/// Who this session is, and where.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub room_id: String,
    pub identity: Identity,
    pub role: Role,
}

/// What the UI layer observes.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RoomChanged(Room),
    RosterChanged(Vec<Participant>),
    SharingStarted,
    SharingStopped,
    PeerStatus {
        remote: String,
        state: ConnectionState,
    },
    /// The host's stream arrived and can be attached to a surface.
    RemoteStream {
        remote: String,
        track: RemoteTrack,
    },
    MuteChanged {
        muted: bool,
    },
    Chat(ChatMessage),
    /// The host ended the party.
    PartyEnded,
}
