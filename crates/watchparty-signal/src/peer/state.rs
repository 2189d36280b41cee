//! Per-connection negotiation state machine.
//!
//! Every transition of a connection goes through [`ConnectionMachine`], so
//! "is this signal stale" is a state lookup. `Closed` absorbs every later
//! event; `Failed` absorbs everything except `close`.

use std::fmt;

use crate::transport::{IceConnectionState, PeerConnectionState};

use super::types::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    New,
    /// Host: offer sent, awaiting an answer.
    OfferSent,
    /// Guest: offer received, applying it.
    OfferReceived,
    /// Host: answer claimed and being applied. Guest: answer being produced.
    AnswerPending,
    /// Descriptions exchanged, ICE in progress.
    Negotiating,
    /// ICE restart in flight.
    Restarting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::OfferSent => "offer-sent",
            Self::OfferReceived => "offer-received",
            Self::AnswerPending => "answer-pending",
            Self::Negotiating => "negotiating",
            Self::Restarting => "restarting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    /// Coarse status string for rendering.
    pub fn ui_status(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
            _ => "connecting",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of feeding an event to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Changed(ConnectionState),
    /// ICE failed with restarts left; the caller must restart ICE.
    RestartIce { attempt: u32 },
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    role: Role,
    state: ConnectionState,
    restarts: u32,
    max_restarts: u32,
    awaiting_answer: bool,
    remote_description_set: bool,
}

impl ConnectionMachine {
    pub fn new(role: Role, max_restarts: u32) -> Self {
        Self {
            role,
            state: ConnectionState::New,
            restarts: 0,
            max_restarts,
            awaiting_answer: false,
            remote_description_set: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn awaiting_answer(&self) -> bool {
        self.awaiting_answer && !self.state.is_terminal()
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    fn set(&mut self, next: ConnectionState) -> Transition {
        if self.state == next {
            Transition::Unchanged
        } else {
            self.state = next;
            Transition::Changed(next)
        }
    }

    // -- host side ----------------------------------------------------------

    /// Local offer is set and about to be relayed. A restart keeps its
    /// `Restarting` state until ICE settles.
    pub fn offer_sent(&mut self) -> Transition {
        if self.role != Role::Host || self.state.is_terminal() {
            return Transition::Unchanged;
        }
        self.awaiting_answer = true;
        if self.state == ConnectionState::Restarting {
            Transition::Unchanged
        } else {
            self.set(ConnectionState::OfferSent)
        }
    }

    /// Take the expected answer. Returns `false` when no answer is expected,
    /// which makes the answer stale.
    pub fn claim_answer(&mut self) -> bool {
        if !self.awaiting_answer() {
            return false;
        }
        match self.state {
            ConnectionState::OfferSent => {
                self.state = ConnectionState::AnswerPending;
            }
            ConnectionState::Restarting => {}
            _ => return false,
        }
        self.awaiting_answer = false;
        true
    }

    /// Give back a claimed answer that the transport refused as out of state.
    pub fn unclaim_answer(&mut self) {
        if self.state == ConnectionState::AnswerPending {
            self.state = ConnectionState::OfferSent;
            self.awaiting_answer = true;
        } else if self.state == ConnectionState::Restarting {
            self.awaiting_answer = true;
        }
    }

    pub fn answer_applied(&mut self) -> Transition {
        self.remote_description_set = true;
        if self.state == ConnectionState::AnswerPending {
            self.set(ConnectionState::Negotiating)
        } else {
            Transition::Unchanged
        }
    }

    // -- guest side ---------------------------------------------------------

    pub fn offer_received(&mut self) -> Transition {
        if self.state.is_terminal() {
            return Transition::Unchanged;
        }
        self.set(ConnectionState::OfferReceived)
    }

    pub fn remote_applied(&mut self) -> Transition {
        if self.state.is_terminal() {
            return Transition::Unchanged;
        }
        self.remote_description_set = true;
        self.set(ConnectionState::AnswerPending)
    }

    pub fn answer_sent(&mut self) -> Transition {
        if self.state == ConnectionState::AnswerPending {
            self.set(ConnectionState::Negotiating)
        } else {
            Transition::Unchanged
        }
    }

    // -- transport callbacks -------------------------------------------------

    pub fn on_ice_state(&mut self, ice: IceConnectionState) -> Transition {
        if self.state.is_terminal() {
            return Transition::Unchanged;
        }
        match ice {
            IceConnectionState::New | IceConnectionState::Checking => Transition::Unchanged,
            IceConnectionState::Connected | IceConnectionState::Completed => {
                self.set(ConnectionState::Connected)
            }
            IceConnectionState::Disconnected => {
                if self.state == ConnectionState::Restarting {
                    Transition::Unchanged
                } else {
                    self.set(ConnectionState::Disconnected)
                }
            }
            IceConnectionState::Failed => {
                if self.restarts < self.max_restarts {
                    self.restarts += 1;
                    self.state = ConnectionState::Restarting;
                    Transition::RestartIce {
                        attempt: self.restarts,
                    }
                } else {
                    self.set(ConnectionState::Failed)
                }
            }
            IceConnectionState::Closed => self.set(ConnectionState::Closed),
        }
    }

    /// Aggregate connection state. Failure here defers to the ICE path
    /// while restarts remain.
    pub fn on_connection_state(&mut self, pc: PeerConnectionState) -> Transition {
        if self.state.is_terminal() {
            return Transition::Unchanged;
        }
        match pc {
            PeerConnectionState::New | PeerConnectionState::Connecting => Transition::Unchanged,
            PeerConnectionState::Connected => self.set(ConnectionState::Connected),
            PeerConnectionState::Disconnected => {
                if self.state == ConnectionState::Restarting {
                    Transition::Unchanged
                } else {
                    self.set(ConnectionState::Disconnected)
                }
            }
            PeerConnectionState::Failed => {
                if self.state == ConnectionState::Restarting || self.restarts < self.max_restarts {
                    Transition::Unchanged
                } else {
                    self.set(ConnectionState::Failed)
                }
            }
            PeerConnectionState::Closed => self.set(ConnectionState::Closed),
        }
    }

    /// The restart timer for `attempt` fired.
    pub fn restart_deadline(&mut self, attempt: u32) -> Transition {
        if self.state == ConnectionState::Restarting && self.restarts == attempt {
            self.set(ConnectionState::Failed)
        } else {
            Transition::Unchanged
        }
    }

    pub fn fail(&mut self) -> Transition {
        if self.state.is_terminal() {
            return Transition::Unchanged;
        }
        self.awaiting_answer = false;
        self.set(ConnectionState::Failed)
    }

    pub fn close(&mut self) -> Transition {
        self.awaiting_answer = false;
        self.set(ConnectionState::Closed)
    }
}
