//! Records exchanged through the room directory.
//!
//! Field names follow the directory's camelCase document shape so the
//! same records can be read by any client of the store. Signals and chat
//! messages share one message stream per room and are told apart by the
//! `isSignal` marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use watchparty_common::{new_id, RoomCode};

// ---------------------------------------------------------------------------
// Broadcast event names
// ---------------------------------------------------------------------------

/// Event names used on a room's realtime channel.
pub mod events {
    pub const ROOM_UPDATE: &str = "room_update";
    pub const ROOM_REQUEST: &str = "room_request";
    pub const MESSAGE: &str = "message";
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Movie,
    Tv,
}

/// What the party is watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRef {
    pub id: u64,
    pub content_type: ContentType,
    pub title: String,
    pub poster: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

/// Input for creating a room.
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub host_id: String,
    pub host_name: String,
    pub content: ContentRef,
}

/// A watch-party room. Ended rooms stay readable with `is_active == false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub code: RoomCode,
    pub host_id: String,
    pub host_name: String,
    pub content_id: u64,
    pub content_type: ContentType,
    pub content_title: String,
    pub content_poster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub is_screen_sharing: bool,
}

impl Room {
    /// Build a fresh, active, not-sharing room with a new id and join code.
    pub fn create(new_room: NewRoom) -> Self {
        let NewRoom {
            host_id,
            host_name,
            content,
        } = new_room;
        Self {
            id: new_id(),
            code: RoomCode::generate(),
            host_id,
            host_name,
            content_id: content.id,
            content_type: content.content_type,
            content_title: content.title,
            content_poster: content.poster,
            season: content.season,
            episode: content.episode,
            created_at: Utc::now(),
            is_active: true,
            is_screen_sharing: false,
        }
    }

    pub fn apply(&mut self, update: RoomUpdate) {
        match update {
            RoomUpdate::ScreenSharing(on) => self.is_screen_sharing = on,
            RoomUpdate::Active(on) => {
                self.is_active = on;
                if !on {
                    self.is_screen_sharing = false;
                }
            }
        }
    }

    pub fn is_host(&self, identity: &str) -> bool {
        self.host_id == identity
    }
}

/// Mutations a client may apply to a room record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomUpdate {
    ScreenSharing(bool),
    Active(bool),
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// Presence record of one user in one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Record id in the directory (not the user identity).
    pub id: String,
    pub identity: String,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Negotiation payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// A session description, serialized as `{"type": "...", "sdp": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate in its browser JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
        }
    }
}

/// A signal as written to the room's message stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRecord {
    pub is_signal: bool,
    pub signal_type: SignalKind,
    /// Serialized [`SessionDescription`] or [`IceCandidate`].
    pub signal_data: String,
    pub from: String,
    pub to: String,
    /// Emission time, milliseconds since the epoch.
    pub timestamp: i64,
}

impl SignalRecord {
    pub fn new(kind: SignalKind, payload: String, from: &str, to: &str) -> Self {
        Self {
            is_signal: true,
            signal_type: kind,
            signal_data: payload,
            from: from.to_string(),
            to: to.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// A signal read back from the directory, with its record id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub id: String,
    pub kind: SignalKind,
    pub payload: String,
    pub from: String,
    pub to: String,
    pub timestamp: i64,
}

impl Signal {
    pub fn from_record(id: impl Into<String>, record: SignalRecord) -> Self {
        Self {
            id: id.into(),
            kind: record.signal_type,
            payload: record.signal_data,
            from: record.from,
            to: record.to,
            timestamp: record.timestamp,
        }
    }

    pub fn to_record(&self) -> SignalRecord {
        SignalRecord {
            is_signal: true,
            signal_type: self.kind,
            signal_data: self.payload.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            timestamp: self.timestamp,
        }
    }

    pub fn description(&self) -> Result<SessionDescription, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    pub fn candidate(&self) -> Result<IceCandidate, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    /// Age relative to `now_ms`; clock skew into the future counts as zero.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.timestamp).max(0)
    }
}

/// Whether a raw message-stream document is a signal rather than chat.
pub fn is_signal_document(value: &serde_json::Value) -> bool {
    value
        .get("isSignal")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content() -> ContentRef {
        ContentRef {
            id: 603,
            content_type: ContentType::Movie,
            title: "The Matrix".into(),
            poster: Some("/matrix.jpg".into()),
            season: None,
            episode: None,
        }
    }

    #[test]
    fn created_room_is_active_and_idle() {
        let room = Room::create(NewRoom {
            host_id: "host".into(),
            host_name: "Hannah".into(),
            content: content(),
        });
        assert!(room.is_active);
        assert!(!room.is_screen_sharing);
        assert!(room.is_host("host"));
        assert_eq!(room.code.as_str().len(), 6);
    }

    #[test]
    fn ending_room_clears_sharing_flag() {
        let mut room = Room::create(NewRoom {
            host_id: "host".into(),
            host_name: "Hannah".into(),
            content: content(),
        });
        room.apply(RoomUpdate::ScreenSharing(true));
        assert!(room.is_screen_sharing);
        room.apply(RoomUpdate::Active(false));
        assert!(!room.is_active);
        assert!(!room.is_screen_sharing);
    }

    #[test]
    fn room_uses_directory_field_names() {
        let room = Room::create(NewRoom {
            host_id: "host".into(),
            host_name: "Hannah".into(),
            content: content(),
        });
        let json = serde_json::to_value(&room).unwrap();
        assert_eq!(json["hostId"], "host");
        assert_eq!(json["contentType"], "movie");
        assert_eq!(json["isScreenSharing"], false);
        assert!(json.get("season").is_none());
    }

    #[test]
    fn signal_record_wire_shape() {
        let record = SignalRecord::new(SignalKind::IceCandidate, "{}".into(), "a", "b");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["isSignal"], true);
        assert_eq!(json["signalType"], "ice-candidate");
        assert_eq!(json["from"], "a");
        assert_eq!(json["to"], "b");
        assert!(is_signal_document(&json));
    }

    #[test]
    fn chat_document_is_not_a_signal() {
        let json = serde_json::json!({ "text": "hi", "identity": "a" });
        assert!(!is_signal_document(&json));
    }

    #[test]
    fn candidate_accepts_browser_json() {
        let raw = r#"{"candidate":"candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"abcd"}"#;
        let c: IceCandidate = serde_json::from_str(raw).unwrap();
        assert_eq!(c.sdp_mid.as_deref(), Some("0"));
        assert_eq!(c.sdp_m_line_index, Some(0));
        assert_eq!(c.username_fragment.as_deref(), Some("abcd"));
    }

    #[test]
    fn signal_decodes_description_payload() {
        let offer = SessionDescription::offer("v=0");
        let record = SignalRecord::new(
            SignalKind::Offer,
            serde_json::to_string(&offer).unwrap(),
            "host",
            "guest",
        );
        let signal = Signal::from_record("sig-1", record);
        assert_eq!(signal.description().unwrap(), offer);
        assert!(signal.candidate().is_err());
    }

    #[test]
    fn future_timestamps_have_zero_age() {
        let mut record = SignalRecord::new(SignalKind::Answer, "{}".into(), "a", "b");
        record.timestamp = 10_000;
        let signal = Signal::from_record("s", record);
        assert_eq!(signal.age_ms(4_000), 0);
        assert_eq!(signal.age_ms(12_500), 2_500);
    }
}
