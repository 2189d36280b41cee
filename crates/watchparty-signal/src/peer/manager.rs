//! Connection table, negotiation steps and event dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use watchparty_config::{IceConfig, NegotiationConfig};

use crate::protocol::{IceCandidate, SessionDescription, SignalKind};
use crate::relay::SignalRelay;
use crate::transport::{
    PeerTransport, SignalingState, TransportError, TransportEvent, TransportEvents,
    TransportFactory,
};

use super::state::{ConnectionMachine, ConnectionState, Transition};
use super::types::{CandidateOutcome, LocalMedia, PeerEvent, PeerEventKind, PeerUpdate, Role};

struct PeerEntry {
    generation: u64,
    transport: Arc<dyn PeerTransport>,
    machine: ConnectionMachine,
    local: LocalMedia,
    /// Candidates that arrived before the remote description.
    pending_candidates: Vec<IceCandidate>,
}

async fn teardown(remote: &str, entry: PeerEntry) {
    entry.transport.close().await;
    entry.local.release();
    debug!(remote, generation = entry.generation, "Connection torn down");
}

/// Owns the local connections of one session, at most one per remote.
#[derive(Clone)]
pub struct PeerConnectionManager {
    factory: Arc<dyn TransportFactory>,
    relay: SignalRelay,
    ice: Arc<IceConfig>,
    policy: NegotiationConfig,
    connections: Arc<Mutex<HashMap<String, PeerEntry>>>,
    next_generation: Arc<AtomicU64>,
    event_tx: mpsc::Sender<PeerEvent>,
}

impl PeerConnectionManager {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        relay: SignalRelay,
        ice: IceConfig,
        policy: NegotiationConfig,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<PeerEvent>) {
        let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
        let mgr = Self {
            factory,
            relay,
            ice: Arc::new(ice),
            policy,
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
            event_tx,
        };
        (mgr, event_rx)
    }

    pub fn relay(&self) -> &SignalRelay {
        &self.relay
    }

    // -----------------------------------------------------------------------
    // Table
    // -----------------------------------------------------------------------

    /// Close any existing connection to `remote`, then build and wire a new
    /// one. Returns the new connection's generation.
    pub async fn create_or_replace(
        &self,
        remote: &str,
        role: Role,
        local: LocalMedia,
    ) -> Result<u64, TransportError> {
        let previous = self.connections.lock().await.remove(remote);
        if let Some(previous) = previous {
            debug!(remote, "Replacing existing connection");
            teardown(remote, previous).await;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let events = TransportEvents::new(remote, generation, self.event_tx.clone());
        let transport = self.factory.create(&self.ice, local.stream(), events).await?;

        let entry = PeerEntry {
            generation,
            transport,
            machine: ConnectionMachine::new(role, self.policy.max_ice_restarts),
            local,
            pending_candidates: Vec::new(),
        };
        let raced = self
            .connections
            .lock()
            .await
            .insert(remote.to_string(), entry);
        if let Some(raced) = raced {
            teardown(remote, raced).await;
        }

        info!(remote, ?role, generation, "Connection created");
        self.publish(remote, generation, ConnectionState::New);
        Ok(generation)
    }

    /// Close and forget the connection to `remote`. Safe to repeat.
    pub async fn close(&self, remote: &str) {
        let entry = self.connections.lock().await.remove(remote);
        if let Some(mut entry) = entry {
            entry.machine.close();
            let generation = entry.generation;
            teardown(remote, entry).await;
            self.publish(remote, generation, ConnectionState::Closed);
        }
    }

    /// Close the connection to `remote` only if it is still `generation`.
    pub async fn close_generation(&self, remote: &str, generation: u64) {
        let entry = {
            let mut conns = self.connections.lock().await;
            match conns.get(remote) {
                Some(e) if e.generation == generation => conns.remove(remote),
                _ => None,
            }
        };
        if let Some(mut entry) = entry {
            entry.machine.close();
            teardown(remote, entry).await;
            self.publish(remote, generation, ConnectionState::Closed);
        }
    }

    /// Close every connection. Safe to repeat.
    pub async fn close_all(&self) {
        let drained: Vec<(String, PeerEntry)> =
            self.connections.lock().await.drain().collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "Closing all connections");
        }
        for (remote, mut entry) in drained {
            entry.machine.close();
            let generation = entry.generation;
            teardown(&remote, entry).await;
            self.publish(&remote, generation, ConnectionState::Closed);
        }
    }

    pub async fn state(&self, remote: &str) -> Option<ConnectionState> {
        self.connections
            .lock()
            .await
            .get(remote)
            .map(|e| e.machine.state())
    }

    /// Every connection and its state, sorted by remote identity.
    pub async fn statuses(&self) -> Vec<(String, ConnectionState)> {
        let mut all: Vec<_> = self
            .connections
            .lock()
            .await
            .iter()
            .map(|(remote, e)| (remote.clone(), e.machine.state()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Whether the connection to `remote` has an offer out and its
    /// transport is still in `have-local-offer`.
    pub async fn awaiting_answer(&self, remote: &str) -> bool {
        self.connections
            .lock()
            .await
            .get(remote)
            .map(|e| {
                e.machine.awaiting_answer()
                    && e.transport.signaling_state() == SignalingState::HaveLocalOffer
            })
            .unwrap_or(false)
    }

    async fn current(&self, remote: &str) -> Option<(u64, Arc<dyn PeerTransport>)> {
        self.connections
            .lock()
            .await
            .get(remote)
            .map(|e| (e.generation, Arc::clone(&e.transport)))
    }

    /// Run `f` on the machine of `remote` if it is still generation `generation`.
    async fn with_machine<R>(
        &self,
        remote: &str,
        generation: u64,
        f: impl FnOnce(&mut PeerEntry) -> R,
    ) -> Option<R> {
        let mut conns = self.connections.lock().await;
        match conns.get_mut(remote) {
            Some(entry) if entry.generation == generation => Some(f(entry)),
            _ => None,
        }
    }

    fn publish(&self, remote: &str, generation: u64, state: ConnectionState) {
        let event = PeerEvent {
            remote: remote.to_string(),
            generation,
            kind: PeerEventKind::Status(state),
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = self.event_tx.try_send(event) {
            warn!(remote, state = %state, "Peer event queue full, status dropped");
        }
    }

    fn publish_transition(&self, remote: &str, generation: u64, transition: Option<Transition>) {
        if let Some(Transition::Changed(state)) = transition {
            self.publish(remote, generation, state);
        }
    }

    async fn fail(&self, remote: &str, generation: u64) {
        let t = self.with_machine(remote, generation, |e| e.machine.fail()).await;
        if let Some(Transition::Changed(_)) = t {
            if let Some((_, transport)) = self.current(remote).await {
                transport.close().await;
            }
        }
        self.publish_transition(remote, generation, t);
    }

    // -----------------------------------------------------------------------
    // Negotiation
    // -----------------------------------------------------------------------

    /// Host: create an offer for `remote`, set it locally and relay it.
    pub async fn send_offer(&self, remote: &str, ice_restart: bool) -> Result<(), TransportError> {
        let (generation, transport) = self.current(remote).await.ok_or(TransportError::Closed)?;

        let offer = transport.create_offer(ice_restart).await?;
        transport.set_local_description(offer.clone()).await?;

        let t = self
            .with_machine(remote, generation, |e| e.machine.offer_sent())
            .await
            .ok_or(TransportError::Closed)?;
        self.publish_transition(remote, generation, Some(t));

        self.relay.send_json(remote, SignalKind::Offer, &offer).await;
        info!(remote, ice_restart, "Offer sent");
        Ok(())
    }

    /// Host: apply an answer if one is expected. Returns `Ok(false)` when
    /// the answer was stale and nothing changed.
    pub async fn apply_answer(
        &self,
        remote: &str,
        answer: SessionDescription,
    ) -> Result<bool, TransportError> {
        let claimed = {
            let mut conns = self.connections.lock().await;
            match conns.get_mut(remote) {
                Some(e) if e.transport.signaling_state() == SignalingState::HaveLocalOffer => {
                    if e.machine.claim_answer() {
                        Some((e.generation, Arc::clone(&e.transport), e.machine.state()))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        let Some((generation, transport, state)) = claimed else {
            debug!(remote, "Stale answer ignored");
            return Ok(false);
        };
        if state == ConnectionState::AnswerPending {
            self.publish(remote, generation, state);
        }

        match transport.set_remote_description(answer).await {
            Ok(()) => {
                let (t, buffered) = self
                    .with_machine(remote, generation, |e| {
                        (
                            e.machine.answer_applied(),
                            std::mem::take(&mut e.pending_candidates),
                        )
                    })
                    .await
                    .ok_or(TransportError::Closed)?;
                self.publish_transition(remote, generation, Some(t));
                self.flush_candidates(remote, &transport, buffered).await;
                info!(remote, "Answer applied");
                Ok(true)
            }
            Err(TransportError::InvalidState(s)) => {
                debug!(remote, state = ?s, "Answer arrived out of state, ignored");
                self.with_machine(remote, generation, |e| e.machine.unclaim_answer())
                    .await;
                Ok(false)
            }
            Err(e) => {
                warn!(remote, error = %e, "Failed to apply answer");
                self.fail(remote, generation).await;
                Err(e)
            }
        }
    }

    /// Guest: apply a remote offer, answer it and relay the answer.
    pub async fn accept_offer(
        &self,
        remote: &str,
        offer: SessionDescription,
    ) -> Result<(), TransportError> {
        let (generation, transport) = self.current(remote).await.ok_or(TransportError::Closed)?;
        let t = self
            .with_machine(remote, generation, |e| e.machine.offer_received())
            .await;
        self.publish_transition(remote, generation, t);

        match self.answer_offer(remote, generation, &transport, offer).await {
            Ok(answer) => {
                self.relay.send_json(remote, SignalKind::Answer, &answer).await;
                info!(remote, "Answer sent");
                Ok(())
            }
            Err(e) => {
                warn!(remote, error = %e, "Failed to answer offer");
                self.fail(remote, generation).await;
                Err(e)
            }
        }
    }

    async fn answer_offer(
        &self,
        remote: &str,
        generation: u64,
        transport: &Arc<dyn PeerTransport>,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        transport.set_remote_description(offer).await?;
        let (t, buffered) = self
            .with_machine(remote, generation, |e| {
                (
                    e.machine.remote_applied(),
                    std::mem::take(&mut e.pending_candidates),
                )
            })
            .await
            .ok_or(TransportError::Closed)?;
        self.publish_transition(remote, generation, Some(t));
        self.flush_candidates(remote, transport, buffered).await;

        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;

        let t = self
            .with_machine(remote, generation, |e| e.machine.answer_sent())
            .await
            .ok_or(TransportError::Closed)?;
        self.publish_transition(remote, generation, Some(t));
        Ok(answer)
    }

    /// Apply a remote candidate, buffering it until the remote description
    /// is in place.
    pub async fn add_ice_candidate(&self, remote: &str, candidate: IceCandidate) -> CandidateOutcome {
        let transport = {
            let mut conns = self.connections.lock().await;
            match conns.get_mut(remote) {
                None => return CandidateOutcome::NoConnection,
                Some(e) if !e.machine.remote_description_set() => {
                    e.pending_candidates.push(candidate);
                    return CandidateOutcome::Buffered;
                }
                Some(e) => Arc::clone(&e.transport),
            }
        };
        match transport.add_ice_candidate(candidate).await {
            Ok(()) => CandidateOutcome::Applied,
            Err(e) => {
                debug!(remote, error = %e, "ICE candidate rejected");
                CandidateOutcome::Rejected
            }
        }
    }

    async fn flush_candidates(
        &self,
        remote: &str,
        transport: &Arc<dyn PeerTransport>,
        buffered: Vec<IceCandidate>,
    ) {
        if buffered.is_empty() {
            return;
        }
        debug!(remote, count = buffered.len(), "Flushing buffered ICE candidates");
        for candidate in buffered {
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                debug!(remote, error = %e, "Buffered ICE candidate rejected");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Apply one queued event. Events from replaced connections are dropped.
    pub async fn handle_event(&self, event: PeerEvent) -> Vec<PeerUpdate> {
        let PeerEvent {
            remote,
            generation,
            kind,
        } = event;

        match kind {
            PeerEventKind::Status(state) => {
                let superseded = self
                    .connections
                    .lock()
                    .await
                    .get(&remote)
                    .is_some_and(|e| e.generation != generation);
                if superseded {
                    Vec::new()
                } else {
                    vec![PeerUpdate::Status { remote, state }]
                }
            }
            PeerEventKind::RestartDeadline { attempt } => {
                let t = self
                    .with_machine(&remote, generation, |e| e.machine.restart_deadline(attempt))
                    .await;
                if let Some(Transition::Changed(ConnectionState::Failed)) = t {
                    warn!(remote = %remote, attempt, "ICE restart timed out");
                }
                self.resolve(&remote, generation, t).await
            }
            PeerEventKind::Transport(TransportEvent::IceCandidate(candidate)) => {
                if self.current(&remote).await.map(|(g, _)| g) == Some(generation) {
                    self.relay
                        .send_json(&remote, SignalKind::IceCandidate, &candidate)
                        .await;
                }
                Vec::new()
            }
            PeerEventKind::Transport(TransportEvent::Track(track)) => {
                if self.current(&remote).await.map(|(g, _)| g) == Some(generation) {
                    vec![PeerUpdate::Track { remote, track }]
                } else {
                    Vec::new()
                }
            }
            PeerEventKind::Transport(TransportEvent::IceConnectionState(ice)) => {
                debug!(remote = %remote, state = ?ice, "ICE state");
                let t = self
                    .with_machine(&remote, generation, |e| e.machine.on_ice_state(ice))
                    .await;
                self.resolve(&remote, generation, t).await
            }
            PeerEventKind::Transport(TransportEvent::ConnectionState(pc)) => {
                debug!(remote = %remote, state = ?pc, "Connection state");
                let t = self
                    .with_machine(&remote, generation, |e| e.machine.on_connection_state(pc))
                    .await;
                self.resolve(&remote, generation, t).await
            }
        }
    }

    async fn resolve(
        &self,
        remote: &str,
        generation: u64,
        transition: Option<Transition>,
    ) -> Vec<PeerUpdate> {
        match transition {
            None | Some(Transition::Unchanged) => Vec::new(),
            Some(Transition::Changed(state)) => {
                if state == ConnectionState::Failed {
                    warn!(remote, "Connection failed");
                    if let Some((_, transport)) = self.current(remote).await {
                        transport.close().await;
                    }
                } else {
                    info!(remote, state = %state, "Connection state changed");
                }
                vec![PeerUpdate::Status {
                    remote: remote.to_string(),
                    state,
                }]
            }
            Some(Transition::RestartIce { attempt }) => self.restart(remote, generation, attempt).await,
        }
    }

    async fn restart(&self, remote: &str, generation: u64, attempt: u32) -> Vec<PeerUpdate> {
        let Some((current, transport)) = self.current(remote).await else {
            return Vec::new();
        };
        if current != generation {
            return Vec::new();
        }
        let role = self
            .with_machine(remote, generation, |e| e.machine.role())
            .await
            .unwrap_or(Role::Guest);

        info!(remote, attempt, max = self.policy.max_ice_restarts, "Restarting ICE");
        if let Err(e) = transport.restart_ice().await {
            warn!(remote, error = %e, "ICE restart failed");
            self.fail(remote, generation).await;
            return Vec::new();
        }

        let tx = self.event_tx.clone();
        let timeout = Duration::from_millis(self.policy.restart_timeout_ms);
        let deadline = PeerEvent {
            remote: remote.to_string(),
            generation,
            kind: PeerEventKind::RestartDeadline { attempt },
        };
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(deadline).await;
        });

        let mut updates = vec![PeerUpdate::Status {
            remote: remote.to_string(),
            state: ConnectionState::Restarting,
        }];
        if role == Role::Host {
            updates.push(PeerUpdate::Renegotiate {
                remote: remote.to_string(),
            });
        }
        updates
    }
}
