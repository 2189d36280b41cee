use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::capture::LocalStream;
use crate::protocol::Participant;

/// Share lifecycle changes reported by [`super::HostSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    SharingStarted,
    SharingStopped,
}

/// The capture currently being shared.
pub(super) struct Sharing {
    /// Distinguishes successive shares so a late capture-ended notice
    /// cannot stop a newer share.
    pub(super) epoch: u64,
    pub(super) stream: Arc<dyn LocalStream>,
}

/// Controller state, owned by one host session for one room.
#[derive(Default)]
pub(super) struct HostState {
    pub(super) sharing: Option<Sharing>,
    /// Latest roster, in join order.
    pub(super) roster: Vec<Participant>,
    /// Identities offered a connection during the current share.
    pub(super) initiated: HashSet<String>,
    /// Identity -> whether an answer is expected.
    pub(super) pending_offers: HashMap<String, bool>,
    pub(super) epoch: u64,
}

impl HostState {
    /// Remote identities in `roster` other than `local_id`, in join order,
    /// without repeats.
    pub(super) fn remotes(&self, local_id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.roster
            .iter()
            .map(|p| p.identity.as_str())
            .filter(|id| *id != local_id && seen.insert(*id))
            .map(str::to_string)
            .collect()
    }

    pub(super) fn reset_tracking(&mut self) {
        self.initiated.clear();
        self.pending_offers.clear();
    }
}
