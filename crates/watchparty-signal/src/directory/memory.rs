//! In-process directory with failure injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use watchparty_common::{new_id, RoomCode};

use crate::chat::ChatMessage;
use crate::protocol::{NewRoom, Participant, Room, RoomUpdate, Signal, SignalRecord};

use super::{newest_first, notify, DirectoryError, RoomDirectory, WATCH_CAPACITY};

#[derive(Default)]
struct RoomEntry {
    room: Option<Room>,
    participants: Vec<Participant>,
    signals: Vec<Signal>,
    /// Every signal ever appended, for inspection.
    sent: Vec<Signal>,
    chat: Vec<ChatMessage>,
    room_watchers: Vec<mpsc::Sender<Room>>,
    roster_watchers: Vec<mpsc::Sender<Vec<Participant>>>,
    signal_watchers: Vec<(String, mpsc::Sender<Signal>)>,
    chat_watchers: Vec<mpsc::Sender<ChatMessage>>,
}

impl RoomEntry {
    fn publish_roster(&mut self) {
        let roster = self.participants.clone();
        notify(&mut self.roster_watchers, &roster);
    }

    fn publish_room(&mut self) {
        if let Some(room) = self.room.clone() {
            notify(&mut self.room_watchers, &room);
        }
    }
}

#[derive(Default)]
struct Faults {
    deny_signal_deletes: AtomicBool,
    fail_signal_writes: AtomicBool,
}

/// Shared in-memory directory. Clones see the same rooms.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    rooms: Arc<RwLock<HashMap<String, RoomEntry>>>,
    faults: Arc<Faults>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every signal delete fail with `PermissionDenied`.
    pub fn deny_signal_deletes(&self, deny: bool) {
        self.faults.deny_signal_deletes.store(deny, Ordering::SeqCst);
    }

    /// Make every signal append fail with `Unavailable`.
    pub fn fail_signal_writes(&self, fail: bool) {
        self.faults.fail_signal_writes.store(fail, Ordering::SeqCst);
    }

    /// Signals currently stored (not yet consumed) in a room.
    pub async fn pending_signals(&self, room_id: &str) -> Vec<Signal> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|e| e.signals.clone())
            .unwrap_or_default()
    }

    /// Every signal appended to a room, consumed or not.
    pub async fn sent_signals(&self, room_id: &str) -> Vec<Signal> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|e| e.sent.clone())
            .unwrap_or_default()
    }

    pub async fn chat_messages(&self, room_id: &str) -> Vec<ChatMessage> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|e| e.chat.clone())
            .unwrap_or_default()
    }

    /// Store a room under a fixed id, replacing any existing record.
    pub async fn insert_room(&self, room: Room) {
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(room.id.clone()).or_default();
        entry.room = Some(room);
        entry.publish_room();
    }

    /// Store a signal record verbatim, bypassing fault injection.
    pub async fn insert_signal(&self, room_id: &str, signal: Signal) {
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(room_id.to_string()).or_default();
        entry.sent.push(signal.clone());
        entry.signals.push(signal.clone());
        entry.signal_watchers.retain(|(recipient, tx)| {
            if *recipient != signal.to {
                return !tx.is_closed();
            }
            !matches!(
                tx.try_send(signal.clone()),
                Err(mpsc::error::TrySendError::Closed(_))
            )
        });
    }
}

#[async_trait]
impl RoomDirectory for MemoryDirectory {
    async fn create_room(&self, new_room: NewRoom) -> Result<Room, DirectoryError> {
        let room = Room::create(new_room);
        debug!(room_id = %room.id, code = %room.code, "Room created");
        self.insert_room(room.clone()).await;
        Ok(room)
    }

    async fn room(&self, room_id: &str) -> Result<Option<Room>, DirectoryError> {
        Ok(self
            .rooms
            .read()
            .await
            .get(room_id)
            .and_then(|e| e.room.clone()))
    }

    async fn find_room_by_code(&self, code: &RoomCode) -> Result<Option<Room>, DirectoryError> {
        Ok(self
            .rooms
            .read()
            .await
            .values()
            .filter_map(|e| e.room.as_ref())
            .find(|r| r.is_active && r.code == *code)
            .cloned())
    }

    async fn rooms_hosted_by(
        &self,
        host_id: &str,
        limit: usize,
    ) -> Result<Vec<Room>, DirectoryError> {
        let rooms = self.rooms.read().await;
        Ok(newest_first(
            rooms.values().filter_map(|e| e.room.as_ref()),
            host_id,
            limit,
        ))
    }

    async fn update_room(&self, room_id: &str, update: RoomUpdate) -> Result<(), DirectoryError> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms
            .get_mut(room_id)
            .filter(|e| e.room.is_some())
            .ok_or_else(|| DirectoryError::NotFound(room_id.to_string()))?;
        if let Some(room) = entry.room.as_mut() {
            room.apply(update);
        }
        entry.publish_room();
        Ok(())
    }

    async fn participants(&self, room_id: &str) -> Result<Vec<Participant>, DirectoryError> {
        Ok(self
            .rooms
            .read()
            .await
            .get(room_id)
            .map(|e| e.participants.clone())
            .unwrap_or_default())
    }

    async fn add_participant(
        &self,
        room_id: &str,
        identity: &str,
        display_name: &str,
    ) -> Result<Participant, DirectoryError> {
        let participant = Participant {
            id: new_id(),
            identity: identity.to_string(),
            display_name: display_name.to_string(),
            joined_at: Utc::now(),
        };
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(room_id.to_string()).or_default();
        entry.participants.push(participant.clone());
        entry.publish_roster();
        Ok(participant)
    }

    async fn remove_participant(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> Result<(), DirectoryError> {
        let mut rooms = self.rooms.write().await;
        if let Some(entry) = rooms.get_mut(room_id) {
            let before = entry.participants.len();
            entry.participants.retain(|p| p.id != participant_id);
            if entry.participants.len() != before {
                entry.publish_roster();
            }
        }
        Ok(())
    }

    async fn append_signal(
        &self,
        room_id: &str,
        record: SignalRecord,
    ) -> Result<String, DirectoryError> {
        if self.faults.fail_signal_writes.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("signal writes disabled".into()));
        }
        let signal = Signal::from_record(new_id(), record);
        let id = signal.id.clone();
        self.insert_signal(room_id, signal).await;
        Ok(id)
    }

    async fn delete_signal(&self, room_id: &str, signal_id: &str) -> Result<(), DirectoryError> {
        if self.faults.deny_signal_deletes.load(Ordering::SeqCst) {
            return Err(DirectoryError::PermissionDenied);
        }
        let mut rooms = self.rooms.write().await;
        if let Some(entry) = rooms.get_mut(room_id) {
            entry.signals.retain(|s| s.id != signal_id);
        }
        Ok(())
    }

    async fn expire_signals(
        &self,
        room_id: &str,
        older_than_ms: i64,
    ) -> Result<usize, DirectoryError> {
        if self.faults.deny_signal_deletes.load(Ordering::SeqCst) {
            return Err(DirectoryError::PermissionDenied);
        }
        let mut rooms = self.rooms.write().await;
        let Some(entry) = rooms.get_mut(room_id) else {
            return Ok(0);
        };
        let before = entry.signals.len();
        entry.signals.retain(|s| s.timestamp >= older_than_ms);
        Ok(before - entry.signals.len())
    }

    async fn append_chat(&self, room_id: &str, message: ChatMessage) -> Result<(), DirectoryError> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(room_id.to_string()).or_default();
        entry.chat.push(message.clone());
        notify(&mut entry.chat_watchers, &message);
        Ok(())
    }

    async fn watch_room(&self, room_id: &str) -> Result<mpsc::Receiver<Room>, DirectoryError> {
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(room_id.to_string()).or_default();
        if let Some(room) = entry.room.clone() {
            let _ = tx.try_send(room);
        }
        entry.room_watchers.push(tx);
        Ok(rx)
    }

    async fn watch_participants(
        &self,
        room_id: &str,
    ) -> Result<mpsc::Receiver<Vec<Participant>>, DirectoryError> {
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(room_id.to_string()).or_default();
        let _ = tx.try_send(entry.participants.clone());
        entry.roster_watchers.push(tx);
        Ok(rx)
    }

    async fn watch_signals(
        &self,
        room_id: &str,
        recipient: &str,
    ) -> Result<mpsc::Receiver<Signal>, DirectoryError> {
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(room_id.to_string()).or_default();
        for signal in entry.signals.iter().filter(|s| s.to == recipient) {
            let _ = tx.try_send(signal.clone());
        }
        entry.signal_watchers.push((recipient.to_string(), tx));
        Ok(rx)
    }

    async fn watch_chat(
        &self,
        room_id: &str,
    ) -> Result<mpsc::Receiver<ChatMessage>, DirectoryError> {
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(room_id.to_string()).or_default();
        for message in &entry.chat {
            let _ = tx.try_send(message.clone());
        }
        entry.chat_watchers.push(tx);
        Ok(rx)
    }
}
