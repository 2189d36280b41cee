//! Room/participant directory seam.
//!
//! The directory is an external, eventually consistent, multi-writer
//! store. It holds room records, participant presence and the message
//! stream that carries both signals and chat. Watchers deliver the
//! current state first, then every change.

mod membership;
mod memory;
mod realtime;

use async_trait::async_trait;
use tokio::sync::mpsc;
use watchparty_common::{PartyError, RoomCode};

use crate::chat::ChatMessage;
use crate::protocol::{NewRoom, Participant, Room, RoomUpdate, Signal, SignalRecord};

pub use membership::Membership;
pub use memory::MemoryDirectory;
pub use realtime::RealtimeDirectory;

/// Capacity of every watcher channel.
pub(crate) const WATCH_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("directory unavailable: {0}")]
    Unavailable(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl From<DirectoryError> for PartyError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::NotFound(what) => Self::RoomNotFound(what),
            other => Self::Directory(other.to_string()),
        }
    }
}

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    // -- rooms --------------------------------------------------------------

    async fn create_room(&self, new_room: NewRoom) -> Result<Room, DirectoryError>;

    async fn room(&self, room_id: &str) -> Result<Option<Room>, DirectoryError>;

    /// Look up an active room by join code.
    async fn find_room_by_code(&self, code: &RoomCode) -> Result<Option<Room>, DirectoryError>;

    /// Rooms hosted by `host_id`, ended ones included, newest first.
    async fn rooms_hosted_by(&self, host_id: &str, limit: usize)
        -> Result<Vec<Room>, DirectoryError>;

    async fn update_room(&self, room_id: &str, update: RoomUpdate) -> Result<(), DirectoryError>;

    // -- participants -------------------------------------------------------

    /// Participants ordered by join time.
    async fn participants(&self, room_id: &str) -> Result<Vec<Participant>, DirectoryError>;

    async fn add_participant(
        &self,
        room_id: &str,
        identity: &str,
        display_name: &str,
    ) -> Result<Participant, DirectoryError>;

    /// Remove a participant record by record id. Missing records are fine.
    async fn remove_participant(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> Result<(), DirectoryError>;

    // -- message stream -----------------------------------------------------

    /// Append a signal; returns its record id.
    async fn append_signal(&self, room_id: &str, record: SignalRecord)
        -> Result<String, DirectoryError>;

    async fn delete_signal(&self, room_id: &str, signal_id: &str) -> Result<(), DirectoryError>;

    /// Delete signals emitted before `older_than_ms`. Returns how many.
    async fn expire_signals(&self, room_id: &str, older_than_ms: i64)
        -> Result<usize, DirectoryError>;

    async fn append_chat(&self, room_id: &str, message: ChatMessage) -> Result<(), DirectoryError>;

    // -- live views ---------------------------------------------------------

    async fn watch_room(&self, room_id: &str) -> Result<mpsc::Receiver<Room>, DirectoryError>;

    async fn watch_participants(
        &self,
        room_id: &str,
    ) -> Result<mpsc::Receiver<Vec<Participant>>, DirectoryError>;

    /// Signals addressed to `recipient`, pending ones first.
    async fn watch_signals(
        &self,
        room_id: &str,
        recipient: &str,
    ) -> Result<mpsc::Receiver<Signal>, DirectoryError>;

    async fn watch_chat(&self, room_id: &str)
        -> Result<mpsc::Receiver<ChatMessage>, DirectoryError>;
}

/// Push `value` to every live watcher, dropping closed ones.
pub(crate) fn notify<T: Clone>(watchers: &mut Vec<mpsc::Sender<T>>, value: &T) {
    watchers.retain(|tx| match tx.try_send(value.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("Directory watcher lagging, update dropped");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
}

/// The `limit` newest rooms of `host_id`.
pub(crate) fn newest_first<'a>(
    rooms: impl Iterator<Item = &'a Room>,
    host_id: &str,
    limit: usize,
) -> Vec<Room> {
    let mut hosted: Vec<Room> = rooms.filter(|r| r.is_host(host_id)).cloned().collect();
    hosted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    hosted.truncate(limit);
    hosted
}
