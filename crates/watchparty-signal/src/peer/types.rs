//! Events and handles shared by the connection manager and its callers.

use std::fmt;
use std::sync::Arc;

use crate::capture::LocalStream;
use crate::transport::{RemoteTrack, TransportEvent};

use super::state::ConnectionState;

/// Which side of the share this client is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Guest,
}

/// Internal event for one connection, tagged with its generation.
#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub remote: String,
    pub generation: u64,
    pub kind: PeerEventKind,
}

#[derive(Debug, Clone)]
pub enum PeerEventKind {
    Transport(TransportEvent),
    /// An ICE restart attempt ran out of time.
    RestartDeadline { attempt: u32 },
    /// State changed by a negotiation step, republished for observers.
    Status(ConnectionState),
}

/// What the manager reports upward after handling a [`PeerEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerUpdate {
    Status {
        remote: String,
        state: ConnectionState,
    },
    Track {
        remote: String,
        track: RemoteTrack,
    },
    /// ICE was restarted on the host side; a restart offer must follow.
    Renegotiate { remote: String },
}

/// Local media attached to a connection.
#[derive(Clone, Default)]
pub enum LocalMedia {
    #[default]
    None,
    /// Owned by someone else (the host's capture); left running on close.
    Shared(Arc<dyn LocalStream>),
    /// Owned by the connection; stopped on close.
    Owned(Arc<dyn LocalStream>),
}

impl LocalMedia {
    pub fn stream(&self) -> Option<Arc<dyn LocalStream>> {
        match self {
            Self::None => None,
            Self::Shared(s) | Self::Owned(s) => Some(Arc::clone(s)),
        }
    }

    pub(crate) fn release(&self) {
        if let Self::Owned(s) = self {
            s.stop();
        }
    }
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Shared(s) => write!(f, "Shared({})", s.id()),
            Self::Owned(s) => write!(f, "Owned({})", s.id()),
        }
    }
}

/// What happened to an incoming ICE candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// No connection for the sender.
    NoConnection,
    /// Held until the remote description is applied.
    Buffered,
    Applied,
    Rejected,
}
