use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::capture::{CaptureError, CaptureRequest, LocalStream, ScreenCapture};
use crate::directory::RoomDirectory;
use crate::peer::{CandidateOutcome, LocalMedia, PeerConnectionManager, PeerUpdate, Role};
use crate::protocol::{Participant, RoomUpdate, Signal, SignalKind};

use super::types::{HostEvent, HostState, Sharing};

/// Drives the host side of a watch party.
#[derive(Clone)]
pub struct HostSession {
    directory: Arc<dyn RoomDirectory>,
    manager: PeerConnectionManager,
    capture: Arc<dyn ScreenCapture>,
    request: CaptureRequest,
    state: Arc<Mutex<HostState>>,
    event_tx: mpsc::Sender<HostEvent>,
}

impl HostSession {
    pub fn new(
        directory: Arc<dyn RoomDirectory>,
        manager: PeerConnectionManager,
        capture: Arc<dyn ScreenCapture>,
        request: CaptureRequest,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<HostEvent>) {
        let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
        let host = Self {
            directory,
            manager,
            capture,
            request,
            state: Arc::new(Mutex::new(HostState::default())),
            event_tx,
        };
        (host, event_rx)
    }

    fn room_id(&self) -> &str {
        self.manager.relay().room_id()
    }

    fn local_id(&self) -> &str {
        self.manager.relay().local_id()
    }

    pub async fn is_sharing(&self) -> bool {
        self.state.lock().await.sharing.is_some()
    }

    /// Identities offered a connection during the current share.
    pub async fn initiated(&self) -> HashSet<String> {
        self.state.lock().await.initiated.clone()
    }

    /// Identity -> whether an answer is still expected.
    pub async fn pending_offers(&self) -> HashMap<String, bool> {
        self.state.lock().await.pending_offers.clone()
    }

    // -----------------------------------------------------------------------
    // Sharing lifecycle
    // -----------------------------------------------------------------------

    /// Acquire the screen and offer it to everyone already in the room.
    ///
    /// A share that is already running is torn down first. Only capture
    /// failures are returned; everything after acquisition is best-effort.
    pub async fn start_sharing(&self) -> Result<(), CaptureError> {
        if self.is_sharing().await {
            info!(room_id = %self.room_id(), "Restarting share, tearing down the previous one");
            self.stop_sharing().await;
        }

        let stream = match self.capture.acquire(&self.request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(room_id = %self.room_id(), code = e.code(), error = %e, "Screen capture failed");
                return Err(e);
            }
        };

        let (epoch, raced, targets) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let raced = state.sharing.take();
            state.epoch += 1;
            state.reset_tracking();
            state.sharing = Some(Sharing {
                epoch: state.epoch,
                stream: Arc::clone(&stream),
            });
            let targets = state.remotes(self.local_id());
            state.initiated.extend(targets.iter().cloned());
            (state.epoch, raced, targets)
        };
        if let Some(raced) = raced {
            raced.stream.stop();
            self.manager.close_all().await;
        }

        self.watch_capture_end(epoch, &stream);
        info!(
            room_id = %self.room_id(),
            stream = stream.id(),
            participants = targets.len(),
            "Sharing started"
        );

        self.set_room_flag(RoomUpdate::ScreenSharing(true)).await;
        self.manager.relay().expire_stale().await;
        self.emit(HostEvent::SharingStarted);

        for remote in targets {
            self.offer_to(&remote, epoch).await;
        }
        Ok(())
    }

    /// Stop the share: stop the capture, close every connection, forget
    /// who was offered and clear the room's sharing flag. Safe to repeat.
    pub async fn stop_sharing(&self) {
        self.stop_matching(None).await;
    }

    /// Stop sharing, then mark the room ended.
    pub async fn end_party(&self) {
        self.stop_sharing().await;
        self.set_room_flag(RoomUpdate::Active(false)).await;
        info!(room_id = %self.room_id(), "Party ended");
    }

    /// Stop the current share, or only share `epoch` when given.
    async fn stop_matching(&self, epoch: Option<u64>) {
        let sharing = {
            let mut state = self.state.lock().await;
            match (&state.sharing, epoch) {
                (None, _) => return,
                (Some(s), Some(e)) if s.epoch != e => return,
                _ => {}
            }
            state.reset_tracking();
            state.sharing.take()
        };
        let Some(sharing) = sharing else {
            return;
        };

        sharing.stream.stop();
        self.manager.close_all().await;
        self.set_room_flag(RoomUpdate::ScreenSharing(false)).await;
        self.manager.relay().expire_stale().await;
        info!(room_id = %self.room_id(), "Sharing stopped");
        self.emit(HostEvent::SharingStopped);
    }

    /// Stop share `epoch` when the platform ends its capture.
    fn watch_capture_end(&self, epoch: u64, stream: &Arc<dyn LocalStream>) {
        let mut ended = stream.ended();
        let host = self.clone();
        tokio::spawn(async move {
            while !*ended.borrow_and_update() {
                if ended.changed().await.is_err() {
                    return;
                }
            }
            debug!(epoch, "Capture ended");
            host.stop_matching(Some(epoch)).await;
        });
    }

    async fn set_room_flag(&self, update: RoomUpdate) {
        if let Err(e) = self.directory.update_room(self.room_id(), update).await {
            warn!(room_id = %self.room_id(), ?update, error = %e, "Failed to update room");
        }
    }

    fn emit(&self, event: HostEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            warn!(?event, "Host event queue full, event dropped");
        }
    }

    // -----------------------------------------------------------------------
    // Offers
    // -----------------------------------------------------------------------

    /// Build a connection to `remote` and send it an offer, as part of
    /// share `epoch`.
    async fn offer_to(&self, remote: &str, epoch: u64) {
        let stream = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            match &state.sharing {
                Some(s) if s.epoch == epoch => {
                    state.pending_offers.insert(remote.to_string(), true);
                    Arc::clone(&s.stream)
                }
                _ => return,
            }
        };

        let generation = match self
            .manager
            .create_or_replace(remote, Role::Host, LocalMedia::Shared(stream))
            .await
        {
            Ok(generation) => generation,
            Err(e) => {
                warn!(remote, error = %e, "Failed to create connection");
                self.clear_pending(remote).await;
                return;
            }
        };
        if !self.offering(remote, epoch).await {
            debug!(remote, epoch, "Share ended while connecting, offer dropped");
            self.manager.close_generation(remote, generation).await;
            return;
        }

        if let Err(e) = self.manager.send_offer(remote, false).await {
            warn!(remote, error = %e, "Failed to offer connection");
            self.clear_pending(remote).await;
        }
        if !self.offering(remote, epoch).await {
            debug!(remote, epoch, "Share ended while offering, connection closed");
            self.manager.close_generation(remote, generation).await;
        }
    }

    /// Whether `remote` is still part of share `epoch`.
    async fn offering(&self, remote: &str, epoch: u64) -> bool {
        let state = self.state.lock().await;
        state.sharing.as_ref().is_some_and(|s| s.epoch == epoch)
            && state.initiated.contains(remote)
    }

    async fn clear_pending(&self, remote: &str) {
        if let Some(flag) = self.state.lock().await.pending_offers.get_mut(remote) {
            *flag = false;
        }
    }

    /// Roster refresh: close connections to departed participants and
    /// offer to newcomers exactly once per share.
    pub async fn handle_roster(&self, participants: Vec<Participant>) {
        let (epoch, departed, newcomers) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            state.roster = participants;
            let Some(epoch) = state.sharing.as_ref().map(|s| s.epoch) else {
                return;
            };

            let present = state.remotes(self.local_id());
            let departed: Vec<String> = state
                .initiated
                .iter()
                .filter(|id| !present.contains(*id))
                .cloned()
                .collect();
            for id in &departed {
                state.initiated.remove(id);
                state.pending_offers.remove(id);
            }

            let newcomers: Vec<String> = present
                .into_iter()
                .filter(|id| state.initiated.insert(id.clone()))
                .collect();
            (epoch, departed, newcomers)
        };

        for remote in departed {
            info!(remote = %remote, "Participant left, closing connection");
            self.manager.close(&remote).await;
        }
        for remote in newcomers {
            info!(remote = %remote, "New participant, sending offer");
            self.offer_to(&remote, epoch).await;
        }
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    pub async fn handle_signal(&self, signal: Signal) {
        match signal.kind {
            SignalKind::Answer => self.handle_answer(signal).await,
            SignalKind::IceCandidate => self.handle_candidate(signal).await,
            SignalKind::Offer => {
                debug!(from = %signal.from, "Host ignores offers");
            }
        }
    }

    async fn handle_answer(&self, signal: Signal) {
        let from = signal.from.as_str();
        let expected = self
            .state
            .lock()
            .await
            .pending_offers
            .get(from)
            .copied()
            .unwrap_or(false);
        if !expected || !self.manager.awaiting_answer(from).await {
            debug!(from, "Stale answer discarded");
            return;
        }

        let answer = match signal.description() {
            Ok(answer) => answer,
            Err(e) => {
                warn!(from, error = %e, "Malformed answer");
                return;
            }
        };

        match self.manager.apply_answer(from, answer).await {
            Ok(true) => self.clear_pending(from).await,
            Ok(false) => debug!(from, "Answer no longer expected"),
            Err(e) => {
                warn!(from, error = %e, "Failed to apply answer");
                self.clear_pending(from).await;
            }
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
        match self.manager.add_ice_candidate(&signal.from, candidate).await {
            CandidateOutcome::NoConnection => {
                warn!(from = %signal.from, "ICE candidate for unknown connection discarded");
            }
            outcome => debug!(from = %signal.from, ?outcome, "ICE candidate handled"),
        }
    }

    // -----------------------------------------------------------------------
    // Connection updates
    // -----------------------------------------------------------------------

    /// Re-offer after an ICE restart.
    pub async fn handle_peer_update(&self, update: &PeerUpdate) {
        let PeerUpdate::Renegotiate { remote } = update else {
            return;
        };
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            if state.sharing.is_none() || !state.initiated.contains(remote) {
                return;
            }
            state.pending_offers.insert(remote.clone(), true);
        }
        if let Err(e) = self.manager.send_offer(remote, true).await {
            warn!(remote = %remote, error = %e, "Failed to send restart offer");
            self.clear_pending(remote).await;
        }
    }
}
