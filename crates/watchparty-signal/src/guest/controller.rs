use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::directory::{DirectoryError, Membership};
use crate::peer::{CandidateOutcome, ConnectionState, LocalMedia, PeerConnectionManager, PeerUpdate, Role};
use crate::protocol::{Participant, Signal, SignalKind};
use crate::transport::RemoteTrack;

#[derive(Debug, Default)]
struct GuestState {
    /// Set from an accepted offer until its connection settles.
    processing: bool,
    muted: bool,
    status: Option<ConnectionState>,
    remote_track: Option<RemoteTrack>,
}

/// Drives the guest side of a watch party.
#[derive(Clone)]
pub struct GuestSession {
    manager: PeerConnectionManager,
    host_id: String,
    state: Arc<Mutex<GuestState>>,
}

impl GuestSession {
    pub fn new(manager: PeerConnectionManager, host_id: &str) -> Self {
        Self {
            manager,
            host_id: host_id.to_string(),
            state: Arc::new(Mutex::new(GuestState::default())),
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub async fn is_processing(&self) -> bool {
        self.state.lock().await.processing
    }

    /// Last known state of the connection to the host.
    pub async fn status(&self) -> Option<ConnectionState> {
        self.state.lock().await.status
    }

    pub async fn remote_track(&self) -> Option<RemoteTrack> {
        self.state.lock().await.remote_track.clone()
    }

    pub async fn is_muted(&self) -> bool {
        self.state.lock().await.muted
    }

    /// Local playback only. Returns whether the value changed.
    pub async fn set_muted(&self, muted: bool) -> bool {
        let mut state = self.state.lock().await;
        let changed = state.muted != muted;
        state.muted = muted;
        changed
    }

    pub async fn toggle_mute(&self) -> bool {
        let mut state = self.state.lock().await;
        state.muted = !state.muted;
        state.muted
    }

    pub async fn handle_signal(&self, signal: Signal) {
        if signal.from != self.host_id {
            debug!(from = %signal.from, kind = signal.kind.as_str(), "Signal from non-host ignored");
            return;
        }
        match signal.kind {
            SignalKind::Offer => self.handle_offer(signal).await,
            SignalKind::IceCandidate => self.handle_candidate(signal).await,
            SignalKind::Answer => {
                debug!(from = %signal.from, "Guest ignores answers");
            }
        }
    }

    async fn handle_offer(&self, signal: Signal) {
        let offer = match signal.description() {
            Ok(offer) => offer,
            Err(e) => {
                warn!(from = %signal.from, error = %e, "Malformed offer");
                return;
            }
        };

        let existing = self.manager.state(&self.host_id).await;
        if existing == Some(ConnectionState::Connected) {
            debug!(host = %self.host_id, "Already connected, offer ignored");
            return;
        }
        {
            let mut state = self.state.lock().await;
            if state.processing {
                debug!(host = %self.host_id, "Offer already in progress, ignored");
                return;
            }
            state.processing = true;
        }

        // A restart offer renegotiates the connection it restarts.
        let result = if existing == Some(ConnectionState::Restarting) {
            info!(host = %self.host_id, "Restart offer received");
            self.manager.accept_offer(&self.host_id, offer).await
        } else {
            info!(host = %self.host_id, "Offer received");
            match self
                .manager
                .create_or_replace(&self.host_id, Role::Guest, LocalMedia::None)
                .await
            {
                Ok(_) => self.manager.accept_offer(&self.host_id, offer).await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = result {
            warn!(host = %self.host_id, error = %e, "Failed to answer offer");
            self.state.lock().await.processing = false;
        }
    }

    async fn handle_candidate(&self, signal: Signal) {
        let candidate = match signal.candidate() {
            Ok(c) => c,
            Err(e) => {
                warn!(from = %signal.from, error = %e, "Malformed ICE candidate");
                return;
            }
        };
        match self.manager.add_ice_candidate(&self.host_id, candidate).await {
            CandidateOutcome::NoConnection => {
                debug!(host = %self.host_id, "ICE candidate before any offer discarded");
            }
            outcome => debug!(host = %self.host_id, ?outcome, "ICE candidate handled"),
        }
    }

    /// Track the host connection: settling states release the processing
    /// guard, tracks are kept for rendering.
    pub async fn handle_peer_update(&self, update: &PeerUpdate) {
        match update {
            PeerUpdate::Status { remote, state } if *remote == self.host_id => {
                let mut guest = self.state.lock().await;
                guest.status = Some(*state);
                if matches!(
                    state,
                    ConnectionState::Connected
                        | ConnectionState::Failed
                        | ConnectionState::Disconnected
                        | ConnectionState::Closed
                ) {
                    guest.processing = false;
                }
                if *state == ConnectionState::Closed {
                    guest.remote_track = None;
                }
            }
            PeerUpdate::Track { remote, track } if *remote == self.host_id => {
                info!(host = %self.host_id, track = %track.track_id, "Remote stream received");
                self.state.lock().await.remote_track = Some(track.clone());
            }
            _ => {}
        }
    }

    /// The host stopped sharing: drop the connection and wait for the next
    /// offer.
    pub async fn host_stopped(&self) {
        self.manager.close(&self.host_id).await;
        let mut state = self.state.lock().await;
        state.processing = false;
        state.remote_track = None;
    }

    /// User-initiated retry: drop every connection and announce a fresh
    /// arrival so the host offers again.
    pub async fn retry(&self, membership: &Membership) -> Result<Participant, DirectoryError> {
        info!(host = %self.host_id, "Retrying connection");
        self.manager.close_all().await;
        {
            let mut state = self.state.lock().await;
            state.processing = false;
            state.status = None;
            state.remote_track = None;
        }
        membership.rejoin().await
    }
}
