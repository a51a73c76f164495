use crate::models::{BookingLifecycleState, CandidateAcceptance, ExternalStatus};

/// Anything that can move a booking between lifecycle states.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    DeadlineExpired,
    External(ExternalStatus),
    CandidateFound(CandidateAcceptance),
    AcceptCandidate,
    RequestAnother,
    Cancel(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPolicy {
    /// Deadline expiry in `Waiting` starts a search instead of expiring.
    pub auto_search: bool,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self { auto_search: true }
    }
}

/// Target state for `trigger`, or `None` when the trigger is ignored.
///
/// `Some(current)` is returned for `Searching` receiving another
/// `rejected`/`expired`: the state stays but the search is re-run.
pub fn next_state(
    current: BookingLifecycleState,
    trigger: &Trigger,
    policy: TransitionPolicy,
) -> Option<BookingLifecycleState> {
    use BookingLifecycleState::*;

    if current.is_final() {
        return None;
    }

    match (current, trigger) {
        (_, Trigger::Cancel(_)) => Some(Cancelled),
        (_, Trigger::External(ExternalStatus::Confirmed)) => Some(Confirmed),
        (Waiting, Trigger::DeadlineExpired) => {
            Some(if policy.auto_search { Searching } else { Expired })
        }
        (
            Waiting | Searching,
            Trigger::External(ExternalStatus::Rejected | ExternalStatus::Expired),
        ) => Some(Searching),
        (Waiting | Searching, Trigger::External(ExternalStatus::BroadcastAll)) => {
            Some(Broadcasting)
        }
        (Searching | Broadcasting, Trigger::CandidateFound(_)) => Some(TherapistFound),
        (TherapistFound, Trigger::AcceptCandidate) => Some(Confirmed),
        (TherapistFound | Expired, Trigger::RequestAnother) => Some(Searching),
        _ => None,
    }
}
