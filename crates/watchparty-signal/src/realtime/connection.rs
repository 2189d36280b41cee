//! Background WebSocket loop with reconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use super::handler::translate;
use super::types::{ChannelConfig, PhoenixMessage, RealtimeCommand, RealtimeConfig, RealtimeEvent};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// A channel to restore after reconnect, with its tracked presence.
#[derive(Debug, Clone)]
pub(crate) struct JoinedChannel {
    pub(crate) config: ChannelConfig,
    pub(crate) presence_payload: Option<serde_json::Value>,
}

type Channels = HashMap<String, JoinedChannel>;

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Frames that restore every joined channel and its presence.
pub(crate) fn rejoin_frames(channels: &Channels, access_token: Option<&str>) -> Vec<PhoenixMessage> {
    let mut frames = Vec::new();
    for (topic, joined) in channels {
        frames.push(PhoenixMessage::on_channel(
            topic,
            "phx_join",
            joined.config.to_join_payload(access_token),
        ));
        if let Some(payload) = &joined.presence_payload {
            frames.push(track_frame(topic, payload.clone()));
        }
    }
    frames
}

fn track_frame(topic: &str, payload: serde_json::Value) -> PhoenixMessage {
    PhoenixMessage::on_channel(
        topic,
        "presence",
        serde_json::json!({ "type": "presence", "event": "track", "payload": payload }),
    )
}

fn leave_frame(topic: &str) -> PhoenixMessage {
    PhoenixMessage::on_channel(topic, "phx_leave", serde_json::json!({}))
}

/// Record the command's effect on channel state and return the frames to
/// send now. `Disconnect` is handled by the caller.
pub(crate) fn apply_command(
    cmd: RealtimeCommand,
    channels: &mut Channels,
    access_token: Option<&str>,
) -> Vec<PhoenixMessage> {
    match cmd {
        RealtimeCommand::JoinChannel { topic, config } => {
            let frame = PhoenixMessage::on_channel(
                &topic,
                "phx_join",
                config.to_join_payload(access_token),
            );
            channels.insert(
                topic,
                JoinedChannel {
                    config,
                    presence_payload: None,
                },
            );
            vec![frame]
        }
        RealtimeCommand::LeaveChannel { topic } => {
            channels.remove(&topic);
            vec![leave_frame(&topic)]
        }
        RealtimeCommand::Broadcast {
            topic,
            event,
            payload,
        } => vec![PhoenixMessage::on_channel(
            &topic,
            "broadcast",
            serde_json::json!({ "type": "broadcast", "event": event, "payload": payload }),
        )],
        RealtimeCommand::PresenceTrack { topic, payload } => {
            if let Some(ch) = channels.get_mut(&topic) {
                ch.presence_payload = Some(payload.clone());
            }
            vec![track_frame(&topic, payload)]
        }
        RealtimeCommand::PresenceUntrack { topic } => {
            if let Some(ch) = channels.get_mut(&topic) {
                ch.presence_payload = None;
            }
            vec![PhoenixMessage::on_channel(
                &topic,
                "presence",
                serde_json::json!({ "type": "presence", "event": "untrack" }),
            )]
        }
        RealtimeCommand::Disconnect => Vec::new(),
    }
}

async fn send_frames<S>(writer: &mut S, frames: Vec<PhoenixMessage>) -> bool
where
    S: Sink<WsMessage> + Unpin,
{
    for frame in frames {
        match serde_json::to_string(&frame) {
            Ok(json) => {
                if writer.send(WsMessage::Text(json.into())).await.is_err() {
                    return false;
                }
            }
            Err(e) => warn!(error = %e, event = %frame.event, "Failed to encode frame"),
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Connection loop
// ---------------------------------------------------------------------------

enum Exit {
    Reconnect,
    Shutdown,
}

pub(crate) async fn connection_loop(
    config: RealtimeConfig,
    connected: Arc<RwLock<bool>>,
    event_tx: mpsc::Sender<RealtimeEvent>,
    mut command_rx: mpsc::Receiver<RealtimeCommand>,
) {
    let mut channels: Channels = HashMap::new();
    let token = config.access_token.clone();
    let mut reconnect_delay = config.reconnect_delay_secs;

    loop {
        let url = config.ws_url();
        info!(url = %url.split('?').next().unwrap_or(""), "Connecting to Supabase Realtime");

        match tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(&url)).await {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay_secs;
                *connected.write().await = true;
                let _ = event_tx.send(RealtimeEvent::Connected).await;

                let (mut writer, mut reader) = ws_stream.split();
                let mut alive =
                    send_frames(&mut writer, rejoin_frames(&channels, token.as_deref())).await;

                let mut heartbeat =
                    tokio::time::interval(Duration::from_secs(config.heartbeat_interval_secs));
                heartbeat.tick().await;

                let mut exit = Exit::Reconnect;
                while alive {
                    tokio::select! {
                        incoming = reader.next() => match incoming {
                            Some(Ok(WsMessage::Text(text))) => {
                                match serde_json::from_str::<PhoenixMessage>(&text) {
                                    Ok(msg) => {
                                        if let Some(event) = translate(&msg) {
                                            let _ = event_tx.send(event).await;
                                        }
                                    }
                                    Err(_) => debug!(text = %text, "Unrecognized message from Supabase"),
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | None => {
                                info!("Supabase Realtime closed connection");
                                alive = false;
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "WebSocket error");
                                alive = false;
                            }
                            Some(Ok(_)) => {}
                        },
                        _ = heartbeat.tick() => {
                            alive = send_frames(&mut writer, vec![PhoenixMessage::heartbeat()]).await;
                        }
                        cmd = command_rx.recv() => match cmd {
                            None | Some(RealtimeCommand::Disconnect) => {
                                let leaves = channels.keys().map(|t| leave_frame(t)).collect();
                                send_frames(&mut writer, leaves).await;
                                let _ = writer.send(WsMessage::Close(None)).await;
                                exit = Exit::Shutdown;
                                alive = false;
                            }
                            Some(cmd) => {
                                let frames = apply_command(cmd, &mut channels, token.as_deref());
                                alive = send_frames(&mut writer, frames).await;
                            }
                        },
                    }
                }

                *connected.write().await = false;
                let _ = event_tx.send(RealtimeEvent::Disconnected).await;
                if matches!(exit, Exit::Shutdown) {
                    return;
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to Supabase Realtime");
                let _ = event_tx
                    .send(RealtimeEvent::Error(format!("Connection failed: {e}")))
                    .await;
            }
            Err(_elapsed) => {
                error!("WebSocket connection timed out after 15s");
                let _ = event_tx
                    .send(RealtimeEvent::Error(
                        "Connection timed out after 15s".to_string(),
                    ))
                    .await;
            }
        }

        if event_tx.is_closed() {
            return;
        }

        info!(delay = reconnect_delay, "Reconnecting in {} seconds", reconnect_delay);
        let sleep = tokio::time::sleep(Duration::from_secs(reconnect_delay));
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = command_rx.recv() => match cmd {
                    None | Some(RealtimeCommand::Disconnect) => return,
                    Some(cmd) => {
                        // Channel state changes apply on rejoin; live frames are lost.
                        let _ = apply_command(cmd, &mut channels, token.as_deref());
                    }
                },
            }
        }
        reconnect_delay = config.next_backoff(reconnect_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::{BroadcastConfig, PresenceConfig};
    use serde_json::json;

    fn channel_config() -> ChannelConfig {
        ChannelConfig {
            broadcast: BroadcastConfig {
                self_send: false,
                ack: false,
            },
            presence: PresenceConfig {
                key: "me".into(),
            },
        }
    }

    #[test]
    fn join_records_channel_and_sends_token() {
        let mut channels = Channels::new();
        let frames = apply_command(
            RealtimeCommand::JoinChannel {
                topic: "watch-party:r1".into(),
                config: channel_config(),
            },
            &mut channels,
            Some("jwt"),
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].topic, "realtime:watch-party:r1");
        assert_eq!(frames[0].event, "phx_join");
        assert_eq!(frames[0].payload["access_token"], "jwt");
        assert_eq!(frames[0].payload["config"]["presence"]["key"], "me");
        assert!(channels.contains_key("watch-party:r1"));
    }

    #[test]
    fn rejoin_restores_tracked_presence() {
        let mut channels = Channels::new();
        apply_command(
            RealtimeCommand::JoinChannel {
                topic: "watch-party:r1".into(),
                config: channel_config(),
            },
            &mut channels,
            None,
        );
        apply_command(
            RealtimeCommand::PresenceTrack {
                topic: "watch-party:r1".into(),
                payload: json!({"identity": "alice"}),
            },
            &mut channels,
            None,
        );

        let frames = rejoin_frames(&channels, None);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "phx_join");
        assert!(frames[0].payload.get("access_token").is_none());
        assert_eq!(frames[1].event, "presence");
        assert_eq!(frames[1].payload["payload"]["identity"], "alice");
    }

    #[test]
    fn untrack_and_leave_forget_state() {
        let mut channels = Channels::new();
        apply_command(
            RealtimeCommand::JoinChannel {
                topic: "t".into(),
                config: channel_config(),
            },
            &mut channels,
            None,
        );
        apply_command(
            RealtimeCommand::PresenceTrack {
                topic: "t".into(),
                payload: json!({}),
            },
            &mut channels,
            None,
        );
        apply_command(
            RealtimeCommand::PresenceUntrack { topic: "t".into() },
            &mut channels,
            None,
        );
        assert_eq!(rejoin_frames(&channels, None).len(), 1);

        let frames = apply_command(
            RealtimeCommand::LeaveChannel { topic: "t".into() },
            &mut channels,
            None,
        );
        assert_eq!(frames[0].event, "phx_leave");
        assert!(rejoin_frames(&channels, None).is_empty());
    }

    #[test]
    fn broadcast_wraps_event_and_refs_increase() {
        let mut channels = Channels::new();
        let a = apply_command(
            RealtimeCommand::Broadcast {
                topic: "t".into(),
                event: "message".into(),
                payload: json!({"x": 1}),
            },
            &mut channels,
            None,
        );
        let b = PhoenixMessage::heartbeat();
        assert_eq!(a[0].payload["type"], "broadcast");
        assert_eq!(a[0].payload["event"], "message");
        let ra: u64 = a[0].msg_ref.as_deref().unwrap().parse().unwrap();
        let rb: u64 = b.msg_ref.as_deref().unwrap().parse().unwrap();
        assert!(rb > ra);
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let config = RealtimeConfig::from(&watchparty_config::RealtimeSettings::default());
        assert_eq!(config.next_backoff(1), 2);
        assert_eq!(config.next_backoff(16), 30);
        assert_eq!(config.next_backoff(30), 30);
    }
}
