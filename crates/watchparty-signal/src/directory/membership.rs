//! One user's presence record in one room.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::protocol::Participant;

use super::{DirectoryError, RoomDirectory};

/// Keeps at most one participant record per (room, identity) alive for
/// the local user.
pub struct Membership {
    directory: Arc<dyn RoomDirectory>,
    room_id: String,
    identity: String,
    display_name: String,
    record: Mutex<Option<Participant>>,
}

impl Membership {
    /// Join `room_id`, reusing an existing record for `identity`.
    pub async fn join(
        directory: Arc<dyn RoomDirectory>,
        room_id: &str,
        identity: &str,
        display_name: &str,
    ) -> Result<Self, DirectoryError> {
        let membership = Self {
            directory,
            room_id: room_id.to_string(),
            identity: identity.to_string(),
            display_name: display_name.to_string(),
            record: Mutex::new(None),
        };
        membership.ensure().await?;
        Ok(membership)
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn participant(&self) -> Option<Participant> {
        self.record.lock().await.clone()
    }

    async fn find_own(&self) -> Result<Vec<Participant>, DirectoryError> {
        let mut own: Vec<Participant> = self
            .directory
            .participants(&self.room_id)
            .await?
            .into_iter()
            .filter(|p| p.identity == self.identity)
            .collect();
        own.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        Ok(own)
    }

    /// Check-then-create, then settle any duplicate that raced in on the
    /// earliest record.
    async fn ensure(&self) -> Result<Participant, DirectoryError> {
        let mut record = self.record.lock().await;

        if let Some(existing) = self.find_own().await?.into_iter().next() {
            debug!(room_id = %self.room_id, identity = %self.identity, "Reusing participant record");
            *record = Some(existing.clone());
            return Ok(existing);
        }

        let created = self
            .directory
            .add_participant(&self.room_id, &self.identity, &self.display_name)
            .await?;

        let own = self.find_own().await?;
        let keep = match own.first() {
            Some(earliest) if earliest.id != created.id => {
                warn!(
                    room_id = %self.room_id,
                    identity = %self.identity,
                    "Duplicate participant record, keeping the earliest"
                );
                if let Err(e) = self
                    .directory
                    .remove_participant(&self.room_id, &created.id)
                    .await
                {
                    debug!(error = %e, "Failed to remove duplicate participant");
                }
                earliest.clone()
            }
            _ => created,
        };

        info!(room_id = %self.room_id, identity = %self.identity, "Joined room");
        *record = Some(keep.clone());
        Ok(keep)
    }

    /// Remove the presence record. Safe to repeat.
    pub async fn leave(&self) {
        let Some(participant) = self.record.lock().await.take() else {
            return;
        };
        match self
            .directory
            .remove_participant(&self.room_id, &participant.id)
            .await
        {
            Ok(()) => info!(room_id = %self.room_id, identity = %self.identity, "Left room"),
            Err(e) => warn!(room_id = %self.room_id, error = %e, "Failed to remove participant"),
        }
    }

    /// Leave and join again, so other clients observe a departure and an
    /// arrival.
    pub async fn rejoin(&self) -> Result<Participant, DirectoryError> {
        self.leave().await;
        self.ensure().await
    }
}
