//! Screen-sharing watch-party signaling.
//!
//! One host captures a screen and fans it out to every guest over
//! peer-to-peer connections. Handshake messages (offer, answer, ICE
//! candidate) travel through a shared room directory used as a relay;
//! media never does.
//!
//! Layers, leaves first: [`relay`] delivers directed signals,
//! [`peer`] owns the connection table and its state machine,
//! [`host`] and [`guest`] drive negotiation, and [`session`] ties them
//! to a room membership.

pub mod capture;
pub mod chat;
pub mod directory;
pub mod guest;
pub mod host;
pub mod identity;
pub mod peer;
pub mod protocol;
pub mod realtime;
pub mod relay;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use capture::{
    CaptureError, CaptureRequest, LocalStream, LocalTrack, ScreenCapture, StreamHandle,
};
pub use chat::{ChatHistory, ChatMessage};
pub use directory::{
    DirectoryError, Membership, MemoryDirectory, RealtimeDirectory, RoomDirectory,
};
pub use guest::GuestSession;
pub use host::{HostEvent, HostSession};
pub use identity::Identity;
pub use peer::{
    CandidateOutcome, ConnectionState, LocalMedia, PeerConnectionManager, PeerEvent, PeerUpdate,
    Role,
};
pub use protocol::{
    ContentRef, ContentType, IceCandidate, NewRoom, Participant, Room, RoomUpdate,
    SessionDescription, Signal, SignalKind, SignalRecord,
};
pub use relay::{SignalRelay, Subscription};
pub use session::{PartyDeps, PartySession, SessionContext, SessionEvent};
pub use transport::{
    IceConnectionState, PeerConnectionState, PeerTransport, RemoteTrack, SignalingState,
    TransportError, TransportEvent, TransportEvents, TransportFactory,
};
