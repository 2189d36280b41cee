//! Directory backed by Supabase Realtime.
//!
//! Each room maps to one channel, `watch-party:{room_id}`. Presence
//! carries the roster: every client tracks the participant records it
//! owns under its own presence key. Room records, signals and chat travel
//! as broadcasts. Broadcasts are not stored, so deleting or expiring a
//! signal is a no-op here, and a client that joins late learns the room
//! record by asking for it with a `room_request` broadcast, answered by
//! whoever created the room.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use watchparty_common::{new_id, RoomCode};
use watchparty_config::RealtimeSettings;

use crate::chat::ChatMessage;
use crate::protocol::{
    events, is_signal_document, NewRoom, Participant, Room, RoomUpdate, Signal, SignalRecord,
};
use crate::realtime::{
    BroadcastConfig, ChannelConfig, PresenceConfig, RealtimeClient, RealtimeConfig, RealtimeEvent,
};

use super::{newest_first, notify, DirectoryError, RoomDirectory, WATCH_CAPACITY};

const TOPIC_PREFIX: &str = "watch-party:";

fn topic_for(room_id: &str) -> String {
    format!("{TOPIC_PREFIX}{room_id}")
}

#[derive(Default)]
struct ChannelState {
    room: Option<Room>,
    /// Created here; answers `room_request` for it.
    authoritative: bool,
    /// Participant records per presence key.
    roster: HashMap<String, Vec<Participant>>,
    /// Records tracked under our own key.
    own: Vec<Participant>,
    room_watchers: Vec<mpsc::Sender<Room>>,
    roster_watchers: Vec<mpsc::Sender<Vec<Participant>>>,
    signal_watchers: Vec<(String, mpsc::Sender<Signal>)>,
    chat_watchers: Vec<mpsc::Sender<ChatMessage>>,
}

impl ChannelState {
    fn participants(&self) -> Vec<Participant> {
        let mut all: Vec<Participant> = self.roster.values().flatten().cloned().collect();
        all.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    fn publish_roster(&mut self) {
        let roster = self.participants();
        notify(&mut self.roster_watchers, &roster);
    }

    fn set_room(&mut self, room: Room) {
        self.room = Some(room.clone());
        notify(&mut self.room_watchers, &room);
    }

    fn deliver_signal(&mut self, signal: &Signal) {
        self.signal_watchers.retain(|(recipient, tx)| {
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

type Channels = Arc<RwLock<HashMap<String, ChannelState>>>;

/// Realtime-backed [`RoomDirectory`].
pub struct RealtimeDirectory {
    client: RealtimeClient,
    presence_key: String,
    channels: Channels,
}

impl RealtimeDirectory {
    /// Connect and start the event translator. Must run inside a tokio
    /// runtime.
    pub fn connect(settings: &RealtimeSettings, access_token: Option<String>) -> Self {
        let config = RealtimeConfig::from(settings).with_access_token(access_token);
        let (client, rt_rx) = RealtimeClient::connect(config);
        let channels: Channels = Arc::new(RwLock::new(HashMap::new()));
        let presence_key = new_id();

        tokio::spawn(event_translator(
            rt_rx,
            client.clone(),
            Arc::clone(&channels),
            presence_key.clone(),
        ));

        Self {
            client,
            presence_key,
            channels,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.client.is_connected().await
    }

    pub async fn disconnect(&self) {
        self.client.disconnect().await;
    }

    /// Join the room's channel on first use.
    async fn ensure_channel(&self, room_id: &str) {
        {
            let mut channels = self.channels.write().await;
            if channels.contains_key(room_id) {
                return;
            }
            channels.insert(room_id.to_string(), ChannelState::default());
        }
        let config = ChannelConfig {
            broadcast: BroadcastConfig {
                self_send: false,
                ack: false,
            },
            presence: PresenceConfig {
                key: self.presence_key.clone(),
            },
        };
        self.client.join_channel(&topic_for(room_id), config).await;
        debug!(room_id, "Joined room channel");
    }

    async fn broadcast_room(&self, room: &Room) {
        match serde_json::to_value(room) {
            Ok(value) => {
                self.client
                    .broadcast(&topic_for(&room.id), events::ROOM_UPDATE, value)
                    .await
            }
            Err(e) => warn!(room_id = %room.id, error = %e, "Failed to encode room"),
        }
    }

    async fn track_own(&self, room_id: &str, own: Vec<Participant>) {
        let topic = topic_for(room_id);
        if own.is_empty() {
            self.client.presence_untrack(&topic).await;
        } else {
            let payload = serde_json::json!({ "participants": own });
            self.client.presence_track(&topic, payload).await;
        }
    }
}

#[async_trait]
impl RoomDirectory for RealtimeDirectory {
    async fn create_room(&self, new_room: NewRoom) -> Result<Room, DirectoryError> {
        let room = Room::create(new_room);
        self.ensure_channel(&room.id).await;
        {
            let mut channels = self.channels.write().await;
            let channel = channels.entry(room.id.clone()).or_default();
            channel.authoritative = true;
            channel.set_room(room.clone());
        }
        self.broadcast_room(&room).await;
        info!(room_id = %room.id, code = %room.code, "Room created");
        Ok(room)
    }

    async fn room(&self, room_id: &str) -> Result<Option<Room>, DirectoryError> {
        self.ensure_channel(room_id).await;
        Ok(self
            .channels
            .read()
            .await
            .get(room_id)
            .and_then(|c| c.room.clone()))
    }

    async fn find_room_by_code(&self, code: &RoomCode) -> Result<Option<Room>, DirectoryError> {
        Ok(self
            .channels
            .read()
            .await
            .values()
            .filter_map(|c| c.room.as_ref())
            .find(|r| r.is_active && r.code == *code)
            .cloned())
    }

    /// Only rooms whose channel this client has seen.
    async fn rooms_hosted_by(
        &self,
        host_id: &str,
        limit: usize,
    ) -> Result<Vec<Room>, DirectoryError> {
        let channels = self.channels.read().await;
        Ok(newest_first(
            channels.values().filter_map(|c| c.room.as_ref()),
            host_id,
            limit,
        ))
    }

    async fn update_room(&self, room_id: &str, update: RoomUpdate) -> Result<(), DirectoryError> {
        let room = {
            let mut channels = self.channels.write().await;
            let channel = channels
                .get_mut(room_id)
                .ok_or_else(|| DirectoryError::NotFound(room_id.to_string()))?;
            let mut room = channel
                .room
                .clone()
                .ok_or_else(|| DirectoryError::NotFound(room_id.to_string()))?;
            room.apply(update);
            channel.set_room(room.clone());
            room
        };
        self.broadcast_room(&room).await;
        Ok(())
    }

    async fn participants(&self, room_id: &str) -> Result<Vec<Participant>, DirectoryError> {
        self.ensure_channel(room_id).await;
        Ok(self
            .channels
            .read()
            .await
            .get(room_id)
            .map(|c| c.participants())
            .unwrap_or_default())
    }

    async fn add_participant(
        &self,
        room_id: &str,
        identity: &str,
        display_name: &str,
    ) -> Result<Participant, DirectoryError> {
        self.ensure_channel(room_id).await;
        let participant = Participant {
            id: new_id(),
            identity: identity.to_string(),
            display_name: display_name.to_string(),
            joined_at: Utc::now(),
        };
        let own = {
            let mut channels = self.channels.write().await;
            let channel = channels.entry(room_id.to_string()).or_default();
            channel.own.push(participant.clone());
            channel
                .roster
                .insert(self.presence_key.clone(), channel.own.clone());
            channel.publish_roster();
            channel.own.clone()
        };
        self.track_own(room_id, own).await;
        Ok(participant)
    }

    async fn remove_participant(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> Result<(), DirectoryError> {
        let own = {
            let mut channels = self.channels.write().await;
            let Some(channel) = channels.get_mut(room_id) else {
                return Ok(());
            };
            let before = channel.own.len();
            channel.own.retain(|p| p.id != participant_id);
            if channel.own.len() == before {
                return Ok(());
            }
            if channel.own.is_empty() {
                channel.roster.remove(&self.presence_key);
            } else {
                channel
                    .roster
                    .insert(self.presence_key.clone(), channel.own.clone());
            }
            channel.publish_roster();
            channel.own.clone()
        };
        self.track_own(room_id, own).await;
        Ok(())
    }

    async fn append_signal(
        &self,
        room_id: &str,
        record: SignalRecord,
    ) -> Result<String, DirectoryError> {
        self.ensure_channel(room_id).await;
        let id = new_id();
        let mut value = serde_json::to_value(&record)
            .map_err(|e| DirectoryError::InvalidRecord(e.to_string()))?;
        value["id"] = serde_json::Value::String(id.clone());
        self.client
            .broadcast(&topic_for(room_id), events::MESSAGE, value)
            .await;
        Ok(id)
    }

    async fn delete_signal(&self, _room_id: &str, _signal_id: &str) -> Result<(), DirectoryError> {
        Ok(())
    }

    async fn expire_signals(
        &self,
        _room_id: &str,
        _older_than_ms: i64,
    ) -> Result<usize, DirectoryError> {
        Ok(0)
    }

    async fn append_chat(&self, room_id: &str, message: ChatMessage) -> Result<(), DirectoryError> {
        self.ensure_channel(room_id).await;
        let value = serde_json::to_value(&message)
            .map_err(|e| DirectoryError::InvalidRecord(e.to_string()))?;
        self.client
            .broadcast(&topic_for(room_id), events::MESSAGE, value)
            .await;
        if let Some(channel) = self.channels.write().await.get_mut(room_id) {
            notify(&mut channel.chat_watchers, &message);
        }
        Ok(())
    }

    async fn watch_room(&self, room_id: &str) -> Result<mpsc::Receiver<Room>, DirectoryError> {
        self.ensure_channel(room_id).await;
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        let mut channels = self.channels.write().await;
        let channel = channels.entry(room_id.to_string()).or_default();
        if let Some(room) = channel.room.clone() {
            let _ = tx.try_send(room);
        }
        channel.room_watchers.push(tx);
        Ok(rx)
    }

    async fn watch_participants(
        &self,
        room_id: &str,
    ) -> Result<mpsc::Receiver<Vec<Participant>>, DirectoryError> {
        self.ensure_channel(room_id).await;
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        let mut channels = self.channels.write().await;
        let channel = channels.entry(room_id.to_string()).or_default();
        let _ = tx.try_send(channel.participants());
        channel.roster_watchers.push(tx);
        Ok(rx)
    }

    async fn watch_signals(
        &self,
        room_id: &str,
        recipient: &str,
    ) -> Result<mpsc::Receiver<Signal>, DirectoryError> {
        self.ensure_channel(room_id).await;
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        let mut channels = self.channels.write().await;
        let channel = channels.entry(room_id.to_string()).or_default();
        channel.signal_watchers.push((recipient.to_string(), tx));
        Ok(rx)
    }

    async fn watch_chat(
        &self,
        room_id: &str,
    ) -> Result<mpsc::Receiver<ChatMessage>, DirectoryError> {
        self.ensure_channel(room_id).await;
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        let mut channels = self.channels.write().await;
        let channel = channels.entry(room_id.to_string()).or_default();
        channel.chat_watchers.push(tx);
        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// Event translator
// ---------------------------------------------------------------------------

/// Participants carried by one presence key's metas.
fn participants_from_metas(metas: &[serde_json::Value]) -> Vec<Participant> {
    metas
        .iter()
        .filter_map(|m| m.get("participants"))
        .filter_map(|p| serde_json::from_value::<Vec<Participant>>(p.clone()).ok())
        .flatten()
        .collect()
}

/// Decode a `message` broadcast into a signal or a chat message.
enum StreamItem {
    Signal(Signal),
    Chat(ChatMessage),
}

fn decode_message(payload: &serde_json::Value) -> Option<StreamItem> {
    if is_signal_document(payload) {
        let id = payload.get("id").and_then(|v| v.as_str())?.to_string();
        let record: SignalRecord = serde_json::from_value(payload.clone()).ok()?;
        Some(StreamItem::Signal(Signal::from_record(id, record)))
    } else {
        serde_json::from_value(payload.clone())
            .ok()
            .map(StreamItem::Chat)
    }
}

async fn event_translator(
    mut rt_rx: mpsc::Receiver<RealtimeEvent>,
    client: RealtimeClient,
    channels: Channels,
    presence_key: String,
) {
    while let Some(event) = rt_rx.recv().await {
        match event {
            RealtimeEvent::Connected => info!("Room directory connected"),
            RealtimeEvent::Disconnected => {
                warn!("Room directory disconnected");
                // Remote presence is rebuilt from the next presence_state.
                let mut channels = channels.write().await;
                for channel in channels.values_mut() {
                    channel.roster.clear();
                    if !channel.own.is_empty() {
                        let own = channel.own.clone();
                        channel.roster.insert(presence_key.clone(), own);
                    }
                    channel.publish_roster();
                }
            }
            RealtimeEvent::ChannelJoined { topic } => {
                let Some(room_id) = topic.strip_prefix(TOPIC_PREFIX) else {
                    continue;
                };
                let (authoritative_room, known) = {
                    let channels = channels.read().await;
                    match channels.get(room_id) {
                        Some(c) if c.authoritative => (c.room.clone(), true),
                        Some(c) => (None, c.room.is_some()),
                        None => (None, false),
                    }
                };
                if let Some(room) = authoritative_room {
                    if let Ok(value) = serde_json::to_value(&room) {
                        client.broadcast(&topic, events::ROOM_UPDATE, value).await;
                    }
                } else if !known {
                    client
                        .broadcast(&topic, events::ROOM_REQUEST, serde_json::json!({}))
                        .await;
                }
            }
            RealtimeEvent::ChannelError { topic, message } => {
                warn!(topic = %topic, message = %message, "Room channel error");
            }
            RealtimeEvent::Error(message) => {
                debug!(message = %message, "Realtime error");
            }
            RealtimeEvent::PresenceState { topic, state } => {
                let Some(room_id) = topic.strip_prefix(TOPIC_PREFIX) else {
                    continue;
                };
                let mut channels = channels.write().await;
                if let Some(channel) = channels.get_mut(room_id) {
                    channel.roster = state
                        .iter()
                        .map(|(key, metas)| (key.clone(), participants_from_metas(metas)))
                        .filter(|(_, ps)| !ps.is_empty())
                        .collect();
                    channel.publish_roster();
                }
            }
            RealtimeEvent::PresenceDiff {
                topic,
                joins,
                leaves,
            } => {
                let Some(room_id) = topic.strip_prefix(TOPIC_PREFIX) else {
                    continue;
                };
                let mut channels = channels.write().await;
                if let Some(channel) = channels.get_mut(room_id) {
                    // Leaves first: a re-track arrives as leave(old) + join(new).
                    for key in leaves.keys() {
                        channel.roster.remove(key);
                    }
                    for (key, metas) in &joins {
                        let ps = participants_from_metas(metas);
                        if !ps.is_empty() {
                            channel.roster.insert(key.clone(), ps);
                        }
                    }
                    channel.publish_roster();
                }
            }
            RealtimeEvent::Broadcast {
                topic,
                event,
                payload,
            } => {
                let Some(room_id) = topic.strip_prefix(TOPIC_PREFIX) else {
                    continue;
                };
                match event.as_str() {
                    events::ROOM_UPDATE => match serde_json::from_value::<Room>(payload) {
                        Ok(room) if room.id == room_id => {
                            if let Some(channel) = channels.write().await.get_mut(room_id) {
                                channel.set_room(room);
                            }
                        }
                        Ok(_) => debug!(room_id, "Room update for another room ignored"),
                        Err(e) => debug!(room_id, error = %e, "Malformed room update"),
                    },
                    events::ROOM_REQUEST => {
                        let room = channels
                            .read()
                            .await
                            .get(room_id)
                            .filter(|c| c.authoritative)
                            .and_then(|c| c.room.clone());
                        if let Some(room) = room {
                            if let Ok(value) = serde_json::to_value(&room) {
                                client.broadcast(&topic, events::ROOM_UPDATE, value).await;
                            }
                        }
                    }
                    events::MESSAGE => match decode_message(&payload) {
                        Some(StreamItem::Signal(signal)) => {
                            if let Some(channel) = channels.write().await.get_mut(room_id) {
                                channel.deliver_signal(&signal);
                            }
                        }
                        Some(StreamItem::Chat(message)) => {
                            if let Some(channel) = channels.write().await.get_mut(room_id) {
                                notify(&mut channel.chat_watchers, &message);
                            }
                        }
                        None => debug!(room_id, "Malformed message broadcast"),
                    },
                    other => debug!(room_id, event = %other, "Unhandled room broadcast"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SignalKind;
    use serde_json::json;

    #[test]
    fn metas_carry_participant_lists() {
        let p = Participant {
            id: "p1".into(),
            identity: "alice".into(),
            display_name: "Alice".into(),
            joined_at: Utc::now(),
        };
        let metas = vec![json!({ "participants": [p.clone()], "phx_ref": "x" })];
        assert_eq!(participants_from_metas(&metas), vec![p]);
        assert!(participants_from_metas(&[json!({ "phx_ref": "y" })]).is_empty());
    }

    #[test]
    fn signal_broadcast_decodes_with_id() {
        let record = SignalRecord::new(SignalKind::Offer, "{}".into(), "host", "alice");
        let mut value = serde_json::to_value(&record).unwrap();
        value["id"] = json!("sig-9");
        match decode_message(&value) {
            Some(StreamItem::Signal(s)) => {
                assert_eq!(s.id, "sig-9");
                assert_eq!(s.to, "alice");
                assert_eq!(s.kind, SignalKind::Offer);
            }
            _ => panic!("expected a signal"),
        }
    }

    #[test]
    fn signal_without_id_is_dropped() {
        let record = SignalRecord::new(SignalKind::Offer, "{}".into(), "host", "alice");
        let value = serde_json::to_value(&record).unwrap();
        assert!(decode_message(&value).is_none());
    }

    #[test]
    fn chat_broadcast_decodes() {
        let msg = ChatMessage::compose("alice", "Alice", "hello").unwrap();
        let value = serde_json::to_value(&msg).unwrap();
        match decode_message(&value) {
            Some(StreamItem::Chat(m)) => assert_eq!(m.text, "hello"),
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn roster_is_ordered_by_join_time() {
        let mut channel = ChannelState::default();
        let early = Participant {
            id: "b".into(),
            identity: "bob".into(),
            display_name: "Bob".into(),
            joined_at: Utc::now() - chrono::Duration::seconds(10),
        };
        let late = Participant {
            id: "a".into(),
            identity: "alice".into(),
            display_name: "Alice".into(),
            joined_at: Utc::now(),
        };
        channel.roster.insert("k1".into(), vec![late.clone()]);
        channel.roster.insert("k2".into(), vec![early.clone()]);
        assert_eq!(channel.participants(), vec![early, late]);
    }
}
