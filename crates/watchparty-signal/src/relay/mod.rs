//! Signal relay client.
//!
//! Delivers short-lived directed signals through the room directory.
//! Delivery is at-least-once: a signal is handed to the subscriber and
//! then deleted best-effort, so a failed delete can cause redelivery.
//! Recently seen ids are remembered to drop such repeats, and signals
//! older than the configured TTL are discarded instead of delivered.

mod dedupe;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use watchparty_config::SignalingConfig;

use crate::directory::{DirectoryError, RoomDirectory};
use crate::protocol::{Signal, SignalKind, SignalRecord};

pub(crate) use dedupe::RecentIds;

/// Sends and receives signals for one identity in one room.
#[derive(Clone)]
pub struct SignalRelay {
    directory: Arc<dyn RoomDirectory>,
    room_id: String,
    local_id: String,
    ttl: Duration,
    dedupe_window: usize,
    capacity: usize,
}

impl SignalRelay {
    pub fn new(
        directory: Arc<dyn RoomDirectory>,
        room_id: &str,
        local_id: &str,
        config: &SignalingConfig,
    ) -> Self {
        Self {
            directory,
            room_id: room_id.to_string(),
            local_id: local_id.to_string(),
            ttl: Duration::from_secs(config.signal_ttl_secs),
            dedupe_window: config.dedupe_window,
            capacity: config.channel_capacity.max(1),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Append a signal addressed to `to`. Failures are logged and swallowed.
    pub async fn send(&self, to: &str, kind: SignalKind, payload: String) {
        let record = SignalRecord::new(kind, payload, &self.local_id, to);
        match self.directory.append_signal(&self.room_id, record).await {
            Ok(id) => debug!(room_id = %self.room_id, to, kind = kind.as_str(), id = %id, "Signal sent"),
            Err(e) => warn!(room_id = %self.room_id, to, kind = kind.as_str(), error = %e, "Signal send failed"),
        }
    }

    pub async fn send_json<T: Serialize>(&self, to: &str, kind: SignalKind, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(json) => self.send(to, kind, json).await,
            Err(e) => warn!(to, kind = kind.as_str(), error = %e, "Failed to encode signal payload"),
        }
    }

    /// Start receiving signals addressed to the local identity.
    pub async fn subscribe(&self) -> Result<Subscription, DirectoryError> {
        let source = self
            .directory
            .watch_signals(&self.room_id, &self.local_id)
            .await?;
        let (tx, rx) = mpsc::channel(self.capacity);
        let task = tokio::spawn(deliver(self.clone(), source, tx));
        Ok(Subscription { rx, task })
    }

    /// Delete the room's signals older than the TTL. Returns how many went.
    pub async fn expire_stale(&self) -> usize {
        let cutoff = chrono::Utc::now().timestamp_millis() - self.ttl_ms();
        match self.directory.expire_signals(&self.room_id, cutoff).await {
            Ok(n) => {
                if n > 0 {
                    debug!(room_id = %self.room_id, expired = n, "Swept stale signals");
                }
                n
            }
            Err(e) => {
                debug!(room_id = %self.room_id, error = %e, "Signal sweep failed");
                0
            }
        }
    }

    fn ttl_ms(&self) -> i64 {
        i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    async fn delete(&self, signal_id: &str) {
        if let Err(e) = self.directory.delete_signal(&self.room_id, signal_id).await {
            debug!(room_id = %self.room_id, id = signal_id, error = %e, "Signal delete failed");
        }
    }
}

async fn deliver(relay: SignalRelay, mut source: mpsc::Receiver<Signal>, tx: mpsc::Sender<Signal>) {
    let mut seen = RecentIds::new(relay.dedupe_window);
    let ttl_ms = relay.ttl_ms();

    while let Some(signal) = source.recv().await {
        if signal.to != relay.local_id {
            continue;
        }
        if !seen.insert(&signal.id) {
            debug!(id = %signal.id, from = %signal.from, "Dropping redelivered signal");
            continue;
        }
        let now = chrono::Utc::now().timestamp_millis();
        if signal.age_ms(now) > ttl_ms {
            debug!(id = %signal.id, kind = signal.kind.as_str(), "Discarding expired signal");
            relay.delete(&signal.id).await;
            continue;
        }

        let id = signal.id.clone();
        if tx.send(signal).await.is_err() {
            break;
        }
        relay.delete(&id).await;
    }
}

/// Live stream of incoming signals. Dropping it stops delivery.
pub struct Subscription {
    rx: mpsc::Receiver<Signal>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
