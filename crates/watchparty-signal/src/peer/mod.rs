//! Peer connection manager.
//!
//! Owns every local connection, keyed by remote identity, and the single
//! state machine each one runs. Transport callbacks arrive as
//! [`PeerEvent`]s on one queue and are turned into [`PeerUpdate`]s by
//! [`PeerConnectionManager::handle_event`].

mod manager;
mod state;
mod types;

pub use manager::PeerConnectionManager;
pub use state::{ConnectionMachine, ConnectionState, Transition};
pub use types::{CandidateOutcome, LocalMedia, PeerEvent, PeerEventKind, PeerUpdate, Role};

#[cfg(test)]
mod tests;
