//! Incoming Phoenix message translation.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::types::{PhoenixMessage, RealtimeEvent};

fn strip_topic_prefix(topic: &str) -> &str {
    topic.strip_prefix("realtime:").unwrap_or(topic)
}

/// Parse a presence map. Supabase sends `{ "key": { "metas": [{ ... }] } }`.
pub(crate) fn parse_presence_map(
    value: &serde_json::Value,
) -> HashMap<String, Vec<serde_json::Value>> {
    let mut result = HashMap::new();
    if let Some(obj) = value.as_object() {
        for (key, val) in obj {
            if let Some(metas) = val.get("metas").and_then(|m| m.as_array()) {
                result.insert(key.clone(), metas.clone());
            }
        }
    }
    result
}

/// Map one server message to a client event. Heartbeat replies and
/// unknown events yield `None`.
pub(crate) fn translate(msg: &PhoenixMessage) -> Option<RealtimeEvent> {
    let topic = strip_topic_prefix(&msg.topic).to_string();

    match msg.event.as_str() {
        "phx_reply" => {
            if msg.topic == "phoenix" {
                return None;
            }
            let status = msg.payload.get("status").and_then(|s| s.as_str())?;
            if status == "ok" {
                debug!(topic = %topic, "Channel reply: ok");
                Some(RealtimeEvent::ChannelJoined { topic })
            } else {
                let message = msg
                    .payload
                    .get("response")
                    .and_then(|r| r.get("reason"))
                    .and_then(|r| r.as_str())
                    .unwrap_or("unknown error")
                    .to_string();
                warn!(topic = %topic, status = %status, "Channel reply error");
                Some(RealtimeEvent::ChannelError { topic, message })
            }
        }
        "phx_error" => {
            warn!(topic = %topic, "Channel error");
            Some(RealtimeEvent::ChannelError {
                topic,
                message: "Channel error".to_string(),
            })
        }
        "phx_close" => {
            info!(topic = %topic, "Channel closed");
            Some(RealtimeEvent::ChannelError {
                topic,
                message: "Channel closed".to_string(),
            })
        }
        "broadcast" => {
            let event = msg
                .payload
                .get("event")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown")
                .to_string();
            let payload = msg
                .payload
                .get("payload")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            debug!(topic = %topic, event = %event, "Broadcast received");
            Some(RealtimeEvent::Broadcast {
                topic,
                event,
                payload,
            })
        }
        "presence_state" => {
            let state = parse_presence_map(&msg.payload);
            debug!(topic = %topic, users = state.len(), "Presence state received");
            Some(RealtimeEvent::PresenceState { topic, state })
        }
        "presence_diff" => {
            let joins = msg
                .payload
                .get("joins")
                .map(parse_presence_map)
                .unwrap_or_default();
            let leaves = msg
                .payload
                .get("leaves")
                .map(parse_presence_map)
                .unwrap_or_default();
            debug!(
                topic = %topic,
                joins = joins.len(),
                leaves = leaves.len(),
                "Presence diff received"
            );
            Some(RealtimeEvent::PresenceDiff {
                topic,
                joins,
                leaves,
            })
        }
        other => {
            debug!(topic = %topic, event = %other, "Unhandled Phoenix event");
            None
        }
    }
}
