//! Peer transport seam.
//!
//! A [`PeerTransport`] is one underlying peer-to-peer connection (a
//! browser `RTCPeerConnection`, a native WebRTC stack). Its callbacks are
//! funneled into a single [`TransportEvent`] stream per connection,
//! tagged with the connection's generation so events from a replaced
//! connection can be recognized and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;
use watchparty_config::IceConfig;

use crate::capture::{LocalStream, TrackKind};
use crate::peer::{PeerEvent, PeerEventKind};
use crate::protocol::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// A remote track announced by the transport, ready to attach to a
/// render surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub track_id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Everything a transport reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    IceCandidate(IceCandidate),
    IceConnectionState(IceConnectionState),
    ConnectionState(PeerConnectionState),
    Track(RemoteTrack),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("operation not valid in signaling state {0:?}")]
    InvalidState(SignalingState),

    #[error("connection closed or replaced")]
    Closed,

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl From<TransportError> for watchparty_common::PartyError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e.to_string())
    }
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    fn signaling_state(&self) -> SignalingState;

    /// Ask the stack to gather fresh ICE credentials.
    async fn restart_ice(&self) -> Result<(), TransportError>;

    /// Close the connection. Must be idempotent.
    async fn close(&self);
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Build a connection. `local` tracks are attached before any offer is
    /// created; `events` receives every callback of the new connection.
    async fn create(
        &self,
        ice: &IceConfig,
        local: Option<Arc<dyn LocalStream>>,
        events: TransportEvents,
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}

/// Event sink handed to a transport at construction.
#[derive(Clone)]
pub struct TransportEvents {
    remote: String,
    generation: u64,
    tx: mpsc::Sender<PeerEvent>,
}

impl TransportEvents {
    pub(crate) fn new(remote: &str, generation: u64, tx: mpsc::Sender<PeerEvent>) -> Self {
        Self {
            remote: remote.to_string(),
            generation,
            tx,
        }
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    fn wrap(&self, event: TransportEvent) -> PeerEvent {
        PeerEvent {
            remote: self.remote.clone(),
            generation: self.generation,
            kind: PeerEventKind::Transport(event),
        }
    }

    /// Report an event from a synchronous callback. Returns `false` if the
    /// event had to be dropped.
    pub fn emit(&self, event: TransportEvent) -> bool {
        match self.tx.try_send(self.wrap(event)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(ev)) => {
                warn!(remote = %self.remote, event = ?ev.kind, "Peer event queue full, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Report an event, waiting for queue space.
    pub async fn send(&self, event: TransportEvent) -> bool {
        self.tx.send(self.wrap(event)).await.is_ok()
    }
}
