use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::{EmergencyRequest, RequestStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Notifying,
    AwaitingAcceptance,
    Matched,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Legal edges of the triage state machine.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Notifying)
                | (Created, Failed)
                | (Notifying, AwaitingAcceptance)
                | (AwaitingAcceptance, Notifying)
                | (AwaitingAcceptance, Matched)
                | (AwaitingAcceptance, Failed)
                | (Created, Closed)
                | (Notifying, Closed)
                | (AwaitingAcceptance, Closed)
                | (Matched, Closed)
        )
    }

    /// Request status as seen by the requester.
    pub fn request_status(self) -> RequestStatus {
        match self {
            SessionState::Created | SessionState::Notifying | SessionState::AwaitingAcceptance => {
                RequestStatus::Open
            }
            SessionState::Matched => RequestStatus::Matched,
            SessionState::Closed | SessionState::Failed => RequestStatus::Closed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Notifying => "notifying",
            SessionState::AwaitingAcceptance => "awaiting_acceptance",
            SessionState::Matched => "matched",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Requester,
    Responder,
    Inactivity,
}

/// Read-only view of a triage session returned by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub request_id: Uuid,
    pub state: SessionState,
    pub request: EmergencyRequest,
    pub search_radius_km: f64,
    pub notified_responder_ids: Vec<String>,
    pub selected_responder_id: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub assistant_active: bool,
    pub message_count: usize,
    pub last_seq: Option<u64>,
    pub last_activity_at: DateTime<Utc>,
    pub close_reason: Option<CloseReason>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_exits() {
        use SessionState::*;
        for from in [Closed, Failed] {
            for to in [Created, Notifying, AwaitingAcceptance, Matched, Closed, Failed] {
                assert!(!from.can_transition_to(to), "{} -> {} must be illegal", from, to);
            }
        }
    }

    #[test]
    fn test_matched_is_irreversible() {
        use SessionState::*;
        assert!(!Matched.can_transition_to(AwaitingAcceptance));
        assert!(!Matched.can_transition_to(Notifying));
        assert!(!Matched.can_transition_to(Failed));
        assert!(Matched.can_transition_to(Closed));
    }

    #[test]
    fn test_request_status_mapping() {
        assert_eq!(SessionState::Notifying.request_status(), RequestStatus::Open);
        assert_eq!(SessionState::Matched.request_status(), RequestStatus::Matched);
        assert_eq!(SessionState::Failed.request_status(), RequestStatus::Closed);
    }
}
