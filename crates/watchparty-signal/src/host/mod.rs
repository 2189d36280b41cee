//! Host session controller.
//!
//! Acquires the screen capture and fans it out to every participant as
//! an offer, keeping pace with roster changes. Two guards keep offers
//! and answers from crossing between await points: the set of
//! identities already offered in the current share, and the per-identity
//! flag recording whether an answer is still expected.

mod controller;
mod types;

pub use controller::HostSession;
pub use types::HostEvent;
