//! Booking lifecycle tracking.
//!
//! [`BookingTracker`] owns one session per booking: lifecycle state, the
//! countdown, the continuous alert and the realtime subscription. Every input
//! (deadline expiry, backend status, user action, search result) goes through
//! the same transition table in [`state`].

pub mod controller;
pub mod events;
pub mod search;
pub mod state;

use serde::{Deserialize, Serialize};

pub use controller::BookingTracker;
pub use events::{Notice, StateChange};
pub use search::{CandidateSearch, RecordCandidateSearch};
pub use state::{next_state, TransitionPolicy, Trigger};

/// Opaque reference to a tracked booking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookingHandle(pub u64);

impl std::fmt::Display for BookingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
