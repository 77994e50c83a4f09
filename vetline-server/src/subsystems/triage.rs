//! Triage session - the per-request state machine and its message log.
//!
//! ```text
//! Created ──► Notifying ──► AwaitingAcceptance ──► Matched ──► Closed
//!    │            ▲                │    │
//!    │            └── escalate ────┘    └──► Failed (radius ceiling reached)
//!    └──► Failed (no candidates)
//! ```
//!
//! A `TriageSession` is plain data; the gateway owns it behind a per-session
//! mutex, so every method here runs with exclusive access. Sequence numbers are
//! handed out by `append`, which makes `seq` strictly increasing per session.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;
use vetline_core::models::{
    ChatMessage, CloseReason, EmergencyRequest, MessageDraft, Responder, Sender, SessionSnapshot,
    SessionState,
};
use vetline_core::VetlineError;

#[derive(Debug)]
pub struct TriageSession {
    request: EmergencyRequest,
    state: SessionState,
    search_radius_km: f64,
    notified: Vec<String>,
    selected_responder_id: Option<String>,
    accepted_at: Option<DateTime<Utc>>,
    responder_has_spoken: bool,
    messages: Vec<ChatMessage>,
    next_seq: u64,
    awaiting_since: Option<DateTime<Utc>>,
    last_activity_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    close_reason: Option<CloseReason>,
}

impl TriageSession {
    pub fn new(request: EmergencyRequest, search_radius_km: f64, now: DateTime<Utc>) -> Self {
        let mut session = Self {
            state: SessionState::Created,
            search_radius_km,
            notified: Vec::new(),
            selected_responder_id: None,
            accepted_at: None,
            responder_has_spoken: false,
            messages: Vec::new(),
            next_seq: 1,
            awaiting_since: None,
            last_activity_at: now,
            finished_at: None,
            close_reason: None,
            request,
        };
        let note = format!(
            "Emergency request received for {} ({}, {}).",
            session.request.pet.name, session.request.pet.species, session.request.pet.age
        );
        session.append(MessageDraft::system(note), now);
        session
    }

    pub fn id(&self) -> Uuid {
        self.request.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn request(&self) -> &EmergencyRequest {
        &self.request
    }

    pub fn search_radius_km(&self) -> f64 {
        self.search_radius_km
    }

    pub fn notified(&self) -> &[String] {
        &self.notified
    }

    pub fn is_notified(&self, responder_id: &str) -> bool {
        self.notified.iter().any(|id| id == responder_id)
    }

    pub fn selected_responder_id(&self) -> Option<&str> {
        self.selected_responder_id.as_deref()
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// True until the matched responder's first message. Terminal sessions accept no messages.
    pub fn assistant_active(&self) -> bool {
        !self.state.is_terminal() && !self.responder_has_spoken
    }

    /// Notify a batch of responders at `radius_km` and start waiting for an acceptance.
    ///
    /// Valid from `Created` (first round) and `AwaitingAcceptance` (escalation).
    pub fn notify(
        &mut self,
        radius_km: f64,
        responder_ids: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<(), VetlineError> {
        self.transition(
            SessionState::Notifying,
            format!("Searching for veterinarians within {} km.", radius_km),
            now,
        )?;
        self.search_radius_km = radius_km;

        let mut added = 0usize;
        for id in responder_ids {
            if !self.is_notified(&id) {
                self.notified.push(id);
                added += 1;
            }
        }

        self.transition(
            SessionState::AwaitingAcceptance,
            format!(
                "Notified {} veterinarian(s) within {} km. Waiting for one to accept.",
                added, radius_km
            ),
            now,
        )?;
        self.awaiting_since = Some(now);
        Ok(())
    }

    /// No responder reachable within `radius_km`, or none accepted before the ceiling.
    pub fn fail(&mut self, radius_km: f64, now: DateTime<Utc>) -> Result<(), VetlineError> {
        let note = if self.state == SessionState::Created {
            format!(
                "No veterinarians are available within {} km. Try expanding your search.",
                radius_km
            )
        } else {
            format!(
                "No veterinarian accepted within {} km. Try expanding your search.",
                radius_km
            )
        };
        self.transition(SessionState::Failed, note, now)?;
        self.search_radius_km = radius_km;
        self.awaiting_since = None;
        Ok(())
    }

    /// Record the winning acceptance. The caller has already claimed the responder.
    pub fn accept(&mut self, responder: &Responder, now: DateTime<Utc>) -> Result<(), VetlineError> {
        if !self.is_notified(&responder.id) {
            return Err(VetlineError::validation(format!(
                "responder {} was not notified for this request",
                responder.id
            )));
        }
        self.transition(
            SessionState::Matched,
            format!("{} accepted the request and will join the chat.", responder.name),
            now,
        )?;
        self.selected_responder_id = Some(responder.id.clone());
        self.accepted_at = Some(now);
        self.awaiting_since = None;
        self.last_activity_at = now;
        Ok(())
    }

    /// Error for sessions that no longer take messages.
    pub fn ensure_accepts_messages(&self) -> Result<(), VetlineError> {
        match self.state {
            SessionState::Failed => Err(VetlineError::NoCandidates(
                "no veterinarian could be matched to this request".to_string(),
            )),
            SessionState::Closed => Err(VetlineError::conflict("session is closed")),
            _ => Ok(()),
        }
    }

    pub fn post_requester(&mut self, content: &str, now: DateTime<Utc>) -> Result<ChatMessage, VetlineError> {
        self.ensure_accepts_messages()?;
        self.last_activity_at = now;
        Ok(self.append(MessageDraft::new(Sender::Requester, content), now))
    }

    /// Append a message from the matched responder. The first one hands the chat over.
    pub fn post_responder(
        &mut self,
        responder_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<ChatMessage, VetlineError> {
        self.ensure_accepts_messages()?;
        if self.state != SessionState::Matched {
            return Err(VetlineError::conflict(
                "responders can only post once the request is matched",
            ));
        }
        if self.selected_responder_id.as_deref() != Some(responder_id) {
            return Err(VetlineError::conflict(format!(
                "responder {} is not assigned to this request",
                responder_id
            )));
        }

        self.last_activity_at = now;
        let message = self.append(MessageDraft::new(Sender::Responder, content), now);
        if !self.responder_has_spoken {
            self.responder_has_spoken = true;
            self.append(
                MessageDraft::system("The veterinarian has joined. The assistant is no longer replying."),
                now,
            );
        }
        Ok(message)
    }

    /// Append an assistant message unless the responder took over in the meantime.
    pub fn append_assistant(&mut self, draft: MessageDraft, now: DateTime<Utc>) -> Option<ChatMessage> {
        if !self.assistant_active() {
            tracing::debug!(request_id = %self.request.id, "Dropping assistant reply after handoff");
            return None;
        }
        Some(self.append(draft, now))
    }

    /// Close the session. Returns `false` when it was already terminal.
    pub fn close(&mut self, reason: CloseReason, now: DateTime<Utc>) -> Result<bool, VetlineError> {
        if self.state.is_terminal() {
            return Ok(false);
        }
        let note = match reason {
            CloseReason::Requester => "Session closed by the requester.",
            CloseReason::Responder => "Session closed by the veterinarian.",
            CloseReason::Inactivity => "Session closed after a period of inactivity.",
        };
        self.transition(SessionState::Closed, note.to_string(), now)?;
        self.close_reason = Some(reason);
        self.awaiting_since = None;
        Ok(true)
    }

    pub fn acceptance_overdue(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.state == SessionState::AwaitingAcceptance
            && self.awaiting_since.map_or(false, |since| now - since >= timeout)
    }

    pub fn inactive(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        !self.state.is_terminal() && now - self.last_activity_at >= timeout
    }

    /// Terminal for at least `retention`, so nothing needs it any more.
    pub fn expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.finished_at.map_or(false, |at| now - at >= retention)
    }

    /// Messages with `seq > after`, in order.
    pub fn messages_after(&self, after: Option<u64>) -> Vec<ChatMessage> {
        let after = after.unwrap_or(0);
        // seq starts at 1 and is dense, so the log index of seq n is n - 1
        let start = usize::try_from(after).unwrap_or(usize::MAX).min(self.messages.len());
        self.messages[start..].to_vec()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            request_id: self.request.id,
            state: self.state,
            request: self.request.clone(),
            search_radius_km: self.search_radius_km,
            notified_responder_ids: self.notified.clone(),
            selected_responder_id: self.selected_responder_id.clone(),
            accepted_at: self.accepted_at,
            assistant_active: self.assistant_active(),
            message_count: self.messages.len(),
            last_seq: self.messages.last().map(|m| m.seq),
            last_activity_at: self.last_activity_at,
            close_reason: self.close_reason,
        }
    }

    fn transition(&mut self, next: SessionState, note: String, now: DateTime<Utc>) -> Result<(), VetlineError> {
        if !self.state.can_transition_to(next) {
            return Err(VetlineError::conflict(format!(
                "session cannot move from {} to {}",
                self.state, next
            )));
        }
        tracing::info!(
            request_id = %self.request.id,
            from = %self.state,
            to = %next,
            "Session transition"
        );
        self.state = next;
        self.request.status = next.request_status();
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.append(MessageDraft::system(note), now);
        Ok(())
    }

    fn append(&mut self, draft: MessageDraft, now: DateTime<Utc>) -> ChatMessage {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            session_id: self.request.id,
            seq: self.next_seq,
            sender: draft.sender,
            content: draft.content,
            sent_at: now,
        };
        self.next_seq += 1;
        self.messages.push(message.clone());
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use vetline_core::models::{Availability, PetProfileInput, RequestStatus, SubmitRequestInput};
    use vetline_core::GeoPoint;

    fn request() -> EmergencyRequest {
        let input = SubmitRequestInput {
            description: "vomiting and lethargy".to_string(),
            pet: PetProfileInput {
                name: "Max".to_string(),
                species: "dog".to_string(),
                age: "5".to_string(),
            },
            location: Some(GeoPoint::new(-34.6037, -58.3816)),
            radius_km: None,
        };
        EmergencyRequest::from_input(&input, Utc::now()).unwrap()
    }

    fn vet(id: &str) -> Responder {
        Responder {
            id: id.to_string(),
            name: format!("Dr. {}", id),
            specialties: BTreeSet::new(),
            equipment: BTreeSet::new(),
            location: GeoPoint::new(-34.6, -58.38),
            rating_average: 4.8,
            rating_count: 10,
            availability: Availability::Available,
            experience_years: 3,
            response_minutes: 5,
        }
    }

    fn awaiting(now: DateTime<Utc>) -> TriageSession {
        let mut s = TriageSession::new(request(), 2.0, now);
        s.notify(2.0, vec!["a".into(), "b".into()], now).unwrap();
        s
    }

    fn seqs(s: &TriageSession) -> Vec<u64> {
        s.history().iter().map(|m| m.seq).collect()
    }

    // ========================================================================
    // TEST 1: notify walks Created -> Notifying -> AwaitingAcceptance
    // ========================================================================
    #[test]
    fn test_notify_moves_to_awaiting() {
        let now = Utc::now();
        let s = awaiting(now);
        assert_eq!(s.state(), SessionState::AwaitingAcceptance);
        assert_eq!(s.notified(), &["a".to_string(), "b".to_string()]);
        assert_eq!(s.request().status, RequestStatus::Open);
        // creation note + two transitions
        assert_eq!(s.history().len(), 3);
        assert!(s.history().iter().all(|m| m.sender == Sender::System));
        assert_eq!(seqs(&s), vec![1, 2, 3]);
    }

    // ========================================================================
    // TEST 2: failing from Created blocks messages with NoCandidates
    // ========================================================================
    #[test]
    fn test_fail_without_candidates() {
        let now = Utc::now();
        let mut s = TriageSession::new(request(), 10.0, now);
        s.fail(10.0, now).unwrap();
        assert_eq!(s.state(), SessionState::Failed);
        assert!(s.history().last().unwrap().content.contains("expanding your search"));
        assert!(!s.assistant_active());
        assert!(matches!(
            s.post_requester("hello?", now),
            Err(VetlineError::NoCandidates(_))
        ));
        assert!(s.accept(&vet("a"), now).is_err());
    }

    // ========================================================================
    // TEST 3: accept requires a notified responder and is irreversible
    // ========================================================================
    #[test]
    fn test_accept_rules() {
        let now = Utc::now();
        let mut s = awaiting(now);

        let err = s.accept(&vet("stranger"), now).unwrap_err();
        assert!(matches!(err, VetlineError::Validation(_)));

        s.accept(&vet("b"), now).unwrap();
        assert_eq!(s.state(), SessionState::Matched);
        assert_eq!(s.selected_responder_id(), Some("b"));
        assert_eq!(s.request().status, RequestStatus::Matched);

        let err = s.accept(&vet("a"), now).unwrap_err();
        assert!(matches!(err, VetlineError::Conflict(_)));
        assert_eq!(s.selected_responder_id(), Some("b"));
    }

    // ========================================================================
    // TEST 4: assistant stays active until the matched responder speaks
    // ========================================================================
    #[test]
    fn test_handoff_on_first_responder_message() {
        let now = Utc::now();
        let mut s = awaiting(now);
        s.accept(&vet("a"), now).unwrap();
        assert!(s.assistant_active());

        assert!(s.post_responder("b", "hi", now).is_err());

        s.post_responder("a", "I'm on my way", now).unwrap();
        assert!(!s.assistant_active());
        let last = s.history().last().unwrap();
        assert_eq!(last.sender, Sender::System);

        let before = s.history().len();
        assert!(s
            .append_assistant(MessageDraft::assistant("late reply"), now)
            .is_none());
        assert_eq!(s.history().len(), before);

        // Only one handoff note
        s.post_responder("a", "ETA 4 minutes", now).unwrap();
        assert_eq!(s.history().last().unwrap().sender, Sender::Responder);
    }

    // ========================================================================
    // TEST 5: responders cannot post before the match
    // ========================================================================
    #[test]
    fn test_responder_post_requires_match() {
        let now = Utc::now();
        let mut s = awaiting(now);
        assert!(matches!(
            s.post_responder("a", "hello", now),
            Err(VetlineError::Conflict(_))
        ));
    }

    // ========================================================================
    // TEST 6: close is idempotent
    // ========================================================================
    #[test]
    fn test_close_idempotent() {
        let now = Utc::now();
        let mut s = awaiting(now);
        assert!(s.close(CloseReason::Requester, now).unwrap());
        let len = s.history().len();
        assert!(!s.close(CloseReason::Requester, now).unwrap());
        assert!(!s.close(CloseReason::Inactivity, now).unwrap());
        assert_eq!(s.history().len(), len);
        assert_eq!(s.snapshot().close_reason, Some(CloseReason::Requester));
        assert_eq!(s.request().status, RequestStatus::Closed);
    }

    // ========================================================================
    // TEST 7: messages_after filters by seq
    // ========================================================================
    #[test]
    fn test_messages_after() {
        let now = Utc::now();
        let mut s = awaiting(now);
        s.post_requester("one", now).unwrap();
        s.post_requester("two", now).unwrap();

        assert_eq!(s.messages_after(None).len(), 5);
        let tail = s.messages_after(Some(3));
        assert_eq!(tail.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(tail[0].content, "one");
        assert!(s.messages_after(Some(99)).is_empty());
    }

    // ========================================================================
    // TEST 8: timeouts
    // ========================================================================
    #[test]
    fn test_overdue_and_inactive() {
        let now = Utc::now();
        let s = awaiting(now);
        let later = now + Duration::seconds(121);
        assert!(!s.acceptance_overdue(now, Duration::seconds(120)));
        assert!(s.acceptance_overdue(later, Duration::seconds(120)));
        assert!(s.inactive(now + Duration::minutes(30), Duration::minutes(30)));
        assert!(!s.inactive(now + Duration::minutes(29), Duration::minutes(30)));
    }

    // ========================================================================
    // TEST 10: only terminal sessions expire, counted from the close
    // ========================================================================
    #[test]
    fn test_expired_after_retention() {
        let now = Utc::now();
        let mut s = awaiting(now);
        let retention = Duration::minutes(60);
        assert!(!s.expired(now + Duration::days(1), retention));

        let closed_at = now + Duration::minutes(10);
        s.close(CloseReason::Requester, closed_at).unwrap();
        assert!(!s.expired(closed_at + Duration::minutes(59), retention));
        assert!(s.expired(closed_at + Duration::minutes(60), retention));

        // an idempotent re-close does not restart the clock
        s.close(CloseReason::Requester, closed_at + Duration::minutes(30)).unwrap();
        assert!(s.expired(closed_at + Duration::minutes(60), retention));
    }

    // ========================================================================
    // TEST 9: escalation keeps earlier notifications and widens the radius
    // ========================================================================
    #[test]
    fn test_escalation_deduplicates() {
        let now = Utc::now();
        let mut s = awaiting(now);
        s.notify(4.0, vec!["b".into(), "c".into()], now).unwrap();
        assert_eq!(s.state(), SessionState::AwaitingAcceptance);
        assert_eq!(s.search_radius_km(), 4.0);
        assert_eq!(s.notified().len(), 3);
        let snapshot = s.snapshot();
        assert_eq!(snapshot.last_seq, Some(snapshot.message_count as u64));
    }
}
