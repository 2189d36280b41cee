//! Guest session controller.
//!
//! Answers the host's offer with a single connection and keeps the
//! received stream's local playback state. Overlapping deliveries of the
//! same offer are absorbed by a processing guard that holds from the
//! first offer until its connection settles.

mod controller;

pub use controller::GuestSession;
