use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use watchparty_common::{PartyError, RoomCode};

use crate::capture::CaptureRequest;
use crate::chat::{ChatHistory, ChatMessage};
use crate::directory::{Membership, RoomDirectory};
use crate::guest::GuestSession;
use crate::host::{HostEvent, HostSession};
use crate::identity::Identity;
use crate::peer::{ConnectionState, PeerConnectionManager, PeerEvent, PeerUpdate, Role};
use crate::protocol::{ContentRef, NewRoom, Participant, Room, Signal};
use crate::relay::{SignalRelay, Subscription};

use super::{PartyDeps, SessionContext, SessionEvent};

/// How long to wait for a room record that has not been synced yet.
const ROOM_WAIT: Duration = Duration::from_secs(5);

/// Parties listed by [`PartySession::recent_parties`].
pub const RECENT_PARTIES: usize = 5;

#[derive(Clone)]
enum Controller {
    Host(HostSession),
    Guest(GuestSession),
}

impl Controller {
    async fn handle_signal(&self, signal: Signal) {
        match self {
            Self::Host(host) => host.handle_signal(signal).await,
            Self::Guest(guest) => guest.handle_signal(signal).await,
        }
    }

    async fn handle_roster(&self, roster: &[Participant]) {
        if let Self::Host(host) = self {
            host.handle_roster(roster.to_vec()).await;
        }
    }

    async fn handle_peer_update(&self, update: &PeerUpdate) {
        match self {
            Self::Host(host) => host.handle_peer_update(update).await,
            Self::Guest(guest) => guest.handle_peer_update(update).await,
        }
    }
}

/// A joined watch party.
pub struct PartySession {
    context: SessionContext,
    directory: Arc<dyn RoomDirectory>,
    membership: Membership,
    manager: PeerConnectionManager,
    controller: Controller,
    room: Arc<RwLock<Room>>,
    chat: Arc<Mutex<ChatHistory>>,
    event_tx: mpsc::Sender<SessionEvent>,
    task: JoinHandle<()>,
    left: AtomicBool,
}

impl PartySession {
    /// Create a room hosted by `identity` and open it.
    pub async fn create(
        deps: PartyDeps,
        identity: Identity,
        content: ContentRef,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), PartyError> {
        let room = deps
            .directory
            .create_room(NewRoom {
                host_id: identity.user_id.clone(),
                host_name: identity.shown_name().to_string(),
                content,
            })
            .await?;
        info!(room_id = %room.id, code = %room.code, "Room created");
        Self::open(deps, &room.id, identity).await
    }

    /// The parties `identity` hosted most recently, ended ones included,
    /// newest first.
    pub async fn recent_parties(
        directory: &dyn RoomDirectory,
        identity: &Identity,
    ) -> Result<Vec<Room>, PartyError> {
        Ok(directory
            .rooms_hosted_by(&identity.user_id, RECENT_PARTIES)
            .await?)
    }

    /// Join an active room by its human-entered code.
    pub async fn join_by_code(
        deps: PartyDeps,
        code: &str,
        identity: Identity,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), PartyError> {
        let not_found = || PartyError::RoomNotFound(code.trim().to_uppercase());
        let code = RoomCode::parse(code).ok_or_else(not_found)?;
        let room = deps
            .directory
            .find_room_by_code(&code)
            .await?
            .ok_or_else(not_found)?;
        Self::open(deps, &room.id, identity).await
    }

    /// Join room `room_id`: announce membership, choose the controller by
    /// comparing `identity` with the room's host, and start the event loop.
    pub async fn open(
        deps: PartyDeps,
        room_id: &str,
        identity: Identity,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), PartyError> {
        let PartyDeps {
            directory,
            transports,
            capture,
            config,
        } = deps;

        let mut room_rx = directory.watch_room(room_id).await?;
        let room = match directory.room(room_id).await? {
            Some(room) => room,
            None => match tokio::time::timeout(ROOM_WAIT, room_rx.recv()).await {
                Ok(Some(room)) => room,
                _ => return Err(PartyError::RoomNotFound(room_id.to_string())),
            },
        };
        if !room.is_active {
            return Err(PartyError::RoomInactive(room.code.to_string()));
        }

        let membership = Membership::join(
            Arc::clone(&directory),
            room_id,
            &identity.user_id,
            identity.shown_name(),
        )
        .await?;

        let role = if room.is_host(&identity.user_id) {
            Role::Host
        } else {
            Role::Guest
        };
        let capacity = config.signaling.channel_capacity;
        let relay = SignalRelay::new(
            Arc::clone(&directory),
            room_id,
            &identity.user_id,
            &config.signaling,
        );
        let (manager, peer_rx) = PeerConnectionManager::new(
            transports,
            relay.clone(),
            config.ice.clone(),
            config.negotiation.clone(),
            capacity,
        );

        let (controller, host_rx) = match role {
            Role::Host => {
                let (host, host_rx) = HostSession::new(
                    Arc::clone(&directory),
                    manager.clone(),
                    capture,
                    CaptureRequest::from(&config.capture),
                    capacity,
                );
                (Controller::Host(host), Some(host_rx))
            }
            Role::Guest => (
                Controller::Guest(GuestSession::new(manager.clone(), &room.host_id)),
                None,
            ),
        };

        let signals = relay.subscribe().await?;
        let roster_rx = directory.watch_participants(room_id).await?;
        let chat_rx = directory.watch_chat(room_id).await?;

        let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
        let room = Arc::new(RwLock::new(room));
        let chat = Arc::new(Mutex::new(ChatHistory::new(config.chat.history_limit)));

        let event_loop = EventLoop {
            controller: controller.clone(),
            manager: manager.clone(),
            room: Arc::clone(&room),
            chat: Arc::clone(&chat),
            event_tx: event_tx.clone(),
        };
        let task = tokio::spawn(event_loop.run(Sources {
            roster: roster_rx,
            signals,
            peers: peer_rx,
            room: room_rx,
            chat: chat_rx,
            host: host_rx,
        }));

        info!(room_id, identity = %identity.user_id, ?role, "Session opened");
        let session = Self {
            context: SessionContext {
                room_id: room_id.to_string(),
                identity,
                role,
            },
            directory,
            membership,
            manager,
            controller,
            room,
            chat,
            event_tx,
            task,
            left: AtomicBool::new(false),
        };
        Ok((session, event_rx))
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn role(&self) -> Role {
        self.context.role
    }

    pub fn host_session(&self) -> Option<&HostSession> {
        match &self.controller {
            Controller::Host(host) => Some(host),
            Controller::Guest(_) => None,
        }
    }

    pub fn guest_session(&self) -> Option<&GuestSession> {
        match &self.controller {
            Controller::Host(_) => None,
            Controller::Guest(guest) => Some(guest),
        }
    }

    /// Latest room record.
    pub async fn room(&self) -> Room {
        self.room.read().await.clone()
    }

    /// Connection state per remote identity.
    pub async fn statuses(&self) -> Vec<(String, ConnectionState)> {
        self.manager.statuses().await
    }

    pub async fn chat_history(&self) -> Vec<ChatMessage> {
        self.chat.lock().await.all().into_iter().cloned().collect()
    }

    /// Post a chat message. Blank text is not sent and yields `None`.
    pub async fn send_chat(&self, text: &str) -> Result<Option<ChatMessage>, PartyError> {
        let identity = &self.context.identity;
        let Some(message) = ChatMessage::compose(&identity.user_id, identity.shown_name(), text)
        else {
            return Ok(None);
        };
        self.directory
            .append_chat(&self.context.room_id, message.clone())
            .await?;
        self.chat.lock().await.push(message.clone());
        Ok(Some(message))
    }

    /// Host only. Capture failures come back as [`PartyError::Capture`]
    /// with their category code.
    pub async fn start_sharing(&self) -> Result<(), PartyError> {
        let host = self.host_session().ok_or(PartyError::NotHost("start sharing"))?;
        host.start_sharing().await?;
        Ok(())
    }

    pub async fn stop_sharing(&self) -> Result<(), PartyError> {
        let host = self.host_session().ok_or(PartyError::NotHost("stop sharing"))?;
        host.stop_sharing().await;
        Ok(())
    }

    pub async fn end_party(&self) -> Result<(), PartyError> {
        let host = self.host_session().ok_or(PartyError::NotHost("end the party"))?;
        host.end_party().await;
        Ok(())
    }

    /// Mute or unmute the received stream. Local only; no-op for the host.
    pub async fn set_muted(&self, muted: bool) {
        let Some(guest) = self.guest_session() else {
            debug!("Host has no received stream to mute");
            return;
        };
        if guest.set_muted(muted).await {
            emit_to(&self.event_tx, SessionEvent::MuteChanged { muted });
        }
    }

    pub async fn toggle_mute(&self) {
        if let Some(guest) = self.guest_session() {
            let muted = guest.toggle_mute().await;
            emit_to(&self.event_tx, SessionEvent::MuteChanged { muted });
        }
    }

    /// Guest: drop the connection and re-announce membership so the host
    /// offers again.
    pub async fn retry(&self) -> Result<(), PartyError> {
        let Some(guest) = self.guest_session() else {
            return Err(PartyError::Other("retry applies to guests".into()));
        };
        guest.retry(&self.membership).await?;
        Ok(())
    }

    /// Tear everything down and remove the presence record. Safe to repeat.
    pub async fn leave(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Controller::Host(host) = &self.controller {
            host.stop_sharing().await;
        }
        self.manager.close_all().await;
        self.task.abort();
        self.membership.leave().await;
        info!(room_id = %self.context.room_id, "Session closed");
    }
}

impl Drop for PartySession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

struct Sources {
    roster: mpsc::Receiver<Vec<Participant>>,
    signals: Subscription,
    peers: mpsc::Receiver<PeerEvent>,
    room: mpsc::Receiver<Room>,
    chat: mpsc::Receiver<ChatMessage>,
    host: Option<mpsc::Receiver<HostEvent>>,
}

struct EventLoop {
    controller: Controller,
    manager: PeerConnectionManager,
    room: Arc<RwLock<Room>>,
    chat: Arc<Mutex<ChatHistory>>,
    event_tx: mpsc::Sender<SessionEvent>,
}

/// Never waits on the UI: a full queue drops the event.
fn emit_to(tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!(?event, "Session event queue full, event dropped");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Session event receiver dropped");
        }
    }
}

async fn next_host_event(rx: &mut Option<mpsc::Receiver<HostEvent>>) -> Option<HostEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl EventLoop {
    async fn run(self, mut sources: Sources) {
        loop {
            tokio::select! {
                Some(roster) = sources.roster.recv() => self.on_roster(roster).await,
                Some(signal) = sources.signals.recv() => self.controller.handle_signal(signal).await,
                Some(event) = sources.peers.recv() => self.on_peer_event(event).await,
                Some(room) = sources.room.recv() => self.on_room(room).await,
                Some(message) = sources.chat.recv() => self.on_chat(message).await,
                Some(event) = next_host_event(&mut sources.host) => self.on_host_event(event).await,
                else => break,
            }
        }
        debug!("Session event loop finished");
    }

    fn emit(&self, event: SessionEvent) {
        emit_to(&self.event_tx, event);
    }

    async fn on_roster(&self, roster: Vec<Participant>) {
        debug!(count = roster.len(), "Roster changed");
        self.controller.handle_roster(&roster).await;
        self.emit(SessionEvent::RosterChanged(roster));
    }

    async fn on_peer_event(&self, event: PeerEvent) {
        for update in self.manager.handle_event(event).await {
            self.controller.handle_peer_update(&update).await;
            match update {
                PeerUpdate::Status { remote, state } => {
                    self.emit(SessionEvent::PeerStatus { remote, state });
                }
                PeerUpdate::Track { remote, track } => {
                    self.emit(SessionEvent::RemoteStream { remote, track });
                }
                PeerUpdate::Renegotiate { .. } => {}
            }
        }
    }

    async fn on_room(&self, room: Room) {
        let previous = {
            let mut current = self.room.write().await;
            std::mem::replace(&mut *current, room.clone())
        };

        if let Controller::Guest(guest) = &self.controller {
            if previous.is_screen_sharing != room.is_screen_sharing {
                if room.is_screen_sharing {
                    self.emit(SessionEvent::SharingStarted);
                } else {
                    guest.host_stopped().await;
                    self.emit(SessionEvent::SharingStopped);
                }
            }
        }
        let ended = previous.is_active && !room.is_active;
        self.emit(SessionEvent::RoomChanged(room));

        if ended {
            info!("Party ended by host");
            self.manager.close_all().await;
            self.emit(SessionEvent::PartyEnded);
        }
    }

    async fn on_chat(&self, message: ChatMessage) {
        let fresh = self.chat.lock().await.push(message.clone());
        if fresh {
            self.emit(SessionEvent::Chat(message));
        }
    }

    async fn on_host_event(&self, event: HostEvent) {
        match event {
            HostEvent::SharingStarted => self.emit(SessionEvent::SharingStarted),
            HostEvent::SharingStopped => self.emit(SessionEvent::SharingStopped),
        }
    }
}

impl std::fmt::Debug for PartySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartySession")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

