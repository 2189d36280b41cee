//! Supabase Realtime client over the Phoenix Channels v1 protocol.
//!
//! One WebSocket, many channels. Handles heartbeats, channel join/leave,
//! broadcast, presence tracking, and reconnect with backoff. Joined
//! channels and tracked presence are restored after every reconnect.

mod client;
mod connection;
mod handler;
mod types;

pub use client::RealtimeClient;
pub use types::{
    BroadcastConfig, ChannelConfig, PhoenixMessage, PresenceConfig, RealtimeConfig, RealtimeEvent,
};
