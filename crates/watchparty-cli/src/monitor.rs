//! Read-only tail of a room on the realtime backend.

use tracing::{info, warn};
use watchparty_common::PartyError;
use watchparty_config::WatchPartyConfig;
use watchparty_signal::{RealtimeDirectory, RoomDirectory};

pub async fn run(config: &WatchPartyConfig, room_id: &str, identity: &str) -> Result<(), PartyError> {
    if config.realtime.project_ref.is_empty() {
        return Err(PartyError::Other(
            "realtime.project_ref is not configured".into(),
        ));
    }

    let directory = RealtimeDirectory::connect(&config.realtime, None);
    let mut rooms = directory.watch_room(room_id).await?;
    let mut roster = directory.watch_participants(room_id).await?;
    let mut signals = directory.watch_signals(room_id, identity).await?;
    let mut chat = directory.watch_chat(room_id).await?;

    info!(room = %room_id, identity = %identity, "Monitoring room, Ctrl-C to stop");

    loop {
        tokio::select! {
            Some(room) = rooms.recv() => {
                info!(
                    code = %room.code,
                    host = %room.host_id,
                    title = %room.content_title,
                    active = room.is_active,
                    sharing = room.is_screen_sharing,
                    "Room"
                );
            }
            Some(participants) = roster.recv() => {
                let names: Vec<&str> = participants.iter().map(|p| p.display_name.as_str()).collect();
                info!(count = participants.len(), ?names, "Roster");
            }
            Some(signal) = signals.recv() => {
                info!(
                    id = %signal.id,
                    kind = signal.kind.as_str(),
                    from = %signal.from,
                    bytes = signal.payload.len(),
                    "Signal"
                );
            }
            Some(message) = chat.recv() => {
                info!(from = %message.display_name, text = %message.text, "Chat");
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
            else => break,
        }
    }

    directory.disconnect().await;
    info!("Monitor stopped");
    Ok(())
}
