//! Request gateway - the single entry point for every triage operation.
//!
//! Owns the responder directory, the session table and the assistant. Each
//! session sits behind its own `tokio::sync::Mutex`; the table lock is only
//! held long enough to look a session up, so sessions never contend with each
//! other. Acceptance is a check-and-set under the session lock combined with
//! the directory's Available→Busy compare-and-set.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;
use vetline_core::config::{MatchingConfig, SessionConfig};
use vetline_core::models::request::MAX_DESCRIPTION_CHARS;
use vetline_core::models::{
    Availability, ChatMessage, CloseReason, EmergencyRequest, Responder, Sender, SessionSnapshot,
    SessionState, SubmitRequestInput,
};
use vetline_core::{rank, Assistant, GeoPoint, RankedCandidate, ResponderDirectory, VetlineConfig, VetlineError};

use super::notifier::{InboxNotifier, Notifier, ResponderNotice};
use super::triage::TriageSession;

/// Hint returned with a submission that found nobody in range.
pub const EXPAND_SEARCH_HINT: &str =
    "No veterinarians are available near you right now. Try expanding your search radius.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub request_id: Uuid,
    pub status: SessionState,
    pub search_radius_km: f64,
    pub notified: Vec<RankedCandidate>,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostOutcome {
    pub message: ChatMessage,
    /// Present when the assistant answered a requester message.
    pub assistant_reply: Option<ChatMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub escalated: usize,
    pub failed: usize,
    pub closed: usize,
    /// Terminal sessions dropped after their retention period.
    pub pruned: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.escalated == 0 && self.failed == 0 && self.closed == 0 && self.pruned == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub responders: usize,
    pub available_responders: usize,
    pub sessions: usize,
    pub open_sessions: usize,
    pub assistant_backend: String,
}

pub struct Gateway {
    directory: Arc<ResponderDirectory>,
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<TriageSession>>>>,
    assistant: Assistant,
    notifier: Arc<dyn Notifier>,
    matching: MatchingConfig,
    session: SessionConfig,
}

impl Gateway {
    pub fn new(
        directory: Arc<ResponderDirectory>,
        assistant: Assistant,
        notifier: Arc<dyn Notifier>,
        matching: MatchingConfig,
        session: SessionConfig,
    ) -> Self {
        Self {
            directory,
            sessions: RwLock::new(HashMap::new()),
            assistant,
            notifier,
            matching,
            session,
        }
    }

    pub fn from_config(config: &VetlineConfig) -> Result<Self, VetlineError> {
        let directory = ResponderDirectory::from_responders(config.responders.clone())?;
        let assistant = Assistant::from_config(&config.assistant)?;
        tracing::info!(
            responders = directory.len(),
            assistant = assistant.backend_name(),
            "Gateway ready"
        );
        Ok(Self::new(
            Arc::new(directory),
            assistant,
            Arc::new(InboxNotifier::new()),
            config.matching.clone(),
            config.session.clone(),
        ))
    }

    pub fn directory(&self) -> &ResponderDirectory {
        &self.directory
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Validate and open a request, then search outward from the requested
    /// radius and notify the best candidates. Finding nobody up to the ceiling
    /// is not an error: the session is returned as `failed` with a hint.
    pub async fn submit_request(&self, input: SubmitRequestInput) -> Result<SubmitOutcome, VetlineError> {
        let now = Utc::now();
        let request = EmergencyRequest::from_input(&input, now)?;
        let radius = self.validate_radius(input.radius_km.unwrap_or(self.matching.initial_radius_km))?;
        let request_id = request.id;
        let location = request.requester_location;

        let mut session = TriageSession::new(request, radius, now);

        let found = self
            .matching
            .radius_schedule(radius)
            .into_iter()
            .map(|r| (r, self.ranked(&location, r)))
            .find(|(_, ranked)| !ranked.is_empty());

        let outcome = match found {
            Some((radius_km, ranked)) => {
                let top: Vec<RankedCandidate> =
                    ranked.into_iter().take(self.matching.notify_top_k.max(1)).collect();
                let ids = top.iter().map(|c| c.responder.id.clone()).collect();
                session.notify(radius_km, ids, now)?;
                session.append_assistant(self.assistant.greeting(), now);
                SubmitOutcome {
                    request_id,
                    status: session.state(),
                    search_radius_km: radius_km,
                    notified: top,
                    hint: None,
                }
            }
            None => {
                session.fail(self.matching.max_radius_km, now)?;
                SubmitOutcome {
                    request_id,
                    status: session.state(),
                    search_radius_km: self.matching.max_radius_km,
                    notified: vec![],
                    hint: Some(EXPAND_SEARCH_HINT.to_string()),
                }
            }
        };

        let emergency = session.request().clone();
        self.sessions
            .write()
            .await
            .insert(request_id, Arc::new(Mutex::new(session)));

        for candidate in &outcome.notified {
            self.notifier.deliver(
                &candidate.responder.id,
                emergency_notice(&emergency, candidate.distance_km),
            );
        }

        tracing::info!(
            request_id = %request_id,
            status = %outcome.status,
            radius_km = outcome.search_radius_km,
            notified = outcome.notified.len(),
            "Emergency request submitted"
        );
        Ok(outcome)
    }

    /// Live ranking of available responders around the request, at `radius_km`
    /// or the session's current search radius.
    pub async fn list_candidates(
        &self,
        request_id: Uuid,
        radius_km: Option<f64>,
    ) -> Result<Vec<RankedCandidate>, VetlineError> {
        let (location, current) = {
            let session = self.session(request_id).await?;
            let session = session.lock().await;
            (session.request().requester_location, session.search_radius_km())
        };
        let radius = match radius_km {
            Some(r) => self.validate_radius(r)?,
            None => current,
        };
        Ok(self.ranked(&location, radius))
    }

    /// Accept a request on behalf of a notified responder. First acceptance wins.
    pub async fn select_responder(
        &self,
        request_id: Uuid,
        responder_id: &str,
    ) -> Result<SessionSnapshot, VetlineError> {
        let responder_id = responder_id.trim();
        if responder_id.is_empty() {
            return Err(VetlineError::validation("responder_id is required"));
        }
        let responder = self
            .directory
            .get(responder_id)
            .ok_or_else(|| VetlineError::not_found(format!("responder {}", responder_id)))?;

        let session = self.session(request_id).await?;
        let mut session = session.lock().await;

        match session.state() {
            SessionState::AwaitingAcceptance => {}
            SessionState::Matched => {
                if session.selected_responder_id() != Some(responder_id) {
                    self.notifier
                        .deliver(responder_id, ResponderNotice::ResponderTooLate { request_id });
                }
                tracing::info!(request_id = %request_id, responder_id = %responder_id, "Acceptance lost");
                return Err(VetlineError::conflict("request has already been accepted"));
            }
            other => {
                return Err(VetlineError::conflict(format!(
                    "request cannot be accepted while {}",
                    other
                )))
            }
        }

        if !session.is_notified(responder_id) {
            return Err(VetlineError::validation(format!(
                "responder {} was not notified for this request",
                responder_id
            )));
        }

        self.directory.claim(responder_id)?;
        if let Err(e) = session.accept(&responder, Utc::now()) {
            self.directory.release(responder_id)?;
            return Err(e);
        }

        tracing::info!(request_id = %request_id, responder_id = %responder_id, "Request matched");
        Ok(session.snapshot())
    }

    /// Post a requester or responder message. Requester messages get an
    /// assistant reply while the assistant is still active.
    pub async fn post_message(
        &self,
        request_id: Uuid,
        sender: &str,
        content: &str,
        responder_id: Option<&str>,
    ) -> Result<PostOutcome, VetlineError> {
        let sender: Sender = sender.parse()?;
        let content = content.trim();
        if content.is_empty() {
            return Err(VetlineError::validation("content is required"));
        }
        if content.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(VetlineError::validation(format!(
                "content exceeds {} characters",
                MAX_DESCRIPTION_CHARS
            )));
        }

        let handle = self.session(request_id).await?;

        match sender {
            Sender::Requester => {
                let (message, history) = {
                    let mut session = handle.lock().await;
                    session.ensure_accepts_messages()?;
                    let history = session.history().to_vec();
                    let message = session.post_requester(content, Utc::now())?;
                    if !session.assistant_active() {
                        return Ok(PostOutcome {
                            message,
                            assistant_reply: None,
                        });
                    }
                    (message, history)
                };

                // The backend call runs without the session lock
                let draft = self.assistant.respond(request_id, &history, content).await;
                let assistant_reply = handle.lock().await.append_assistant(draft, Utc::now());
                Ok(PostOutcome {
                    message,
                    assistant_reply,
                })
            }
            Sender::Responder => {
                let responder_id = responder_id
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| VetlineError::validation("responder_id is required for responder messages"))?;
                let message = handle
                    .lock()
                    .await
                    .post_responder(responder_id, content, Utc::now())?;
                Ok(PostOutcome {
                    message,
                    assistant_reply: None,
                })
            }
            Sender::Assistant | Sender::System => Err(VetlineError::validation(format!(
                "sender must be requester or responder, got {}",
                sender
            ))),
        }
    }

    pub async fn get_messages(&self, request_id: Uuid, after: Option<u64>) -> Result<Vec<ChatMessage>, VetlineError> {
        let session = self.session(request_id).await?;
        let messages = session.lock().await.messages_after(after);
        Ok(messages)
    }

    pub async fn get_session(&self, request_id: Uuid) -> Result<SessionSnapshot, VetlineError> {
        let session = self.session(request_id).await?;
        let snapshot = session.lock().await.snapshot();
        Ok(snapshot)
    }

    /// Close a session by either party. Closing a finished session changes nothing.
    pub async fn close_session(
        &self,
        request_id: Uuid,
        by: &str,
        responder_id: Option<&str>,
    ) -> Result<SessionSnapshot, VetlineError> {
        let reason = match by.trim().to_ascii_lowercase().as_str() {
            "requester" => CloseReason::Requester,
            "responder" => CloseReason::Responder,
            other => {
                return Err(VetlineError::validation(format!(
                    "by must be requester or responder, got '{}'",
                    other
                )))
            }
        };

        let handle = self.session(request_id).await?;
        let mut session = handle.lock().await;

        if reason == CloseReason::Responder && !session.state().is_terminal() {
            let responder_id = responder_id.map(str::trim).unwrap_or_default();
            if session.selected_responder_id() != Some(responder_id) {
                return Err(VetlineError::conflict(format!(
                    "responder '{}' is not assigned to this request",
                    responder_id
                )));
            }
        }

        self.close_locked(&mut session, reason, Utc::now())?;
        Ok(session.snapshot())
    }

    // ========================================================================
    // Responders
    // ========================================================================

    pub async fn set_availability(&self, responder_id: &str, availability: &str) -> Result<Responder, VetlineError> {
        let availability: Availability = availability.parse()?;
        self.directory.set_availability(responder_id, availability)?;
        self.directory
            .get(responder_id)
            .ok_or_else(|| VetlineError::not_found(format!("responder {}", responder_id)))
    }

    pub async fn pending_notifications(&self, responder_id: &str) -> Result<Vec<ResponderNotice>, VetlineError> {
        if self.directory.get(responder_id).is_none() {
            return Err(VetlineError::not_found(format!("responder {}", responder_id)));
        }
        Ok(self.notifier.drain(responder_id))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Apply timeouts as of `now`: idle sessions close, requests nobody
    /// accepted in time either widen their search or fail at the ceiling, and
    /// sessions finished longer ago than the retention period are dropped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let acceptance_timeout = Duration::seconds(self.session.acceptance_timeout_secs as i64);
        let inactivity_timeout = Duration::minutes(self.session.inactivity_timeout_minutes as i64);
        let retention = Duration::minutes(self.session.retention_minutes as i64);
        let mut report = SweepReport::default();
        let mut expired = Vec::new();

        let entries: Vec<(Uuid, Arc<Mutex<TriageSession>>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, Arc::clone(handle)))
            .collect();

        for (request_id, handle) in entries {
            let mut session = handle.lock().await;

            if session.expired(now, retention) {
                expired.push(request_id);
                continue;
            }

            if session.inactive(now, inactivity_timeout) {
                match self.close_locked(&mut session, CloseReason::Inactivity, now) {
                    Ok(true) => report.closed += 1,
                    Ok(false) => {}
                    Err(e) => tracing::warn!(request_id = %session.id(), error = %e, "Inactivity close failed"),
                }
                continue;
            }

            if !session.acceptance_overdue(now, acceptance_timeout) {
                continue;
            }

            let current = session.search_radius_km();
            let result = if current >= self.matching.max_radius_km {
                session.fail(current, now).map(|_| {
                    report.failed += 1;
                })
            } else {
                self.escalate_locked(&mut session, now).map(|_| {
                    report.escalated += 1;
                })
            };
            if let Err(e) = result {
                tracing::warn!(request_id = %session.id(), error = %e, "Acceptance timeout handling failed");
            }
        }

        if !expired.is_empty() {
            let mut sessions = self.sessions.write().await;
            for request_id in &expired {
                if sessions.remove(request_id).is_some() {
                    self.notifier.forget(*request_id);
                    report.pruned += 1;
                }
            }
        }

        if !report.is_empty() {
            tracing::info!(
                escalated = report.escalated,
                failed = report.failed,
                closed = report.closed,
                pruned = report.pruned,
                "Sweep complete"
            );
        }
        report
    }

    pub async fn health(&self) -> HealthReport {
        let sessions = self.all_sessions().await;
        let mut open_sessions = 0;
        for handle in &sessions {
            if !handle.lock().await.state().is_terminal() {
                open_sessions += 1;
            }
        }
        let all = self.directory.all();
        HealthReport {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            responders: all.len(),
            available_responders: all
                .iter()
                .filter(|r| r.availability == Availability::Available)
                .count(),
            sessions: sessions.len(),
            open_sessions,
            assistant_backend: self.assistant.backend_name().to_string(),
        }
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    async fn session(&self, request_id: Uuid) -> Result<Arc<Mutex<TriageSession>>, VetlineError> {
        self.sessions
            .read()
            .await
            .get(&request_id)
            .cloned()
            .ok_or_else(|| VetlineError::not_found(format!("request {}", request_id)))
    }

    async fn all_sessions(&self) -> Vec<Arc<Mutex<TriageSession>>> {
        self.sessions.read().await.values().cloned().collect()
    }

    fn ranked(&self, center: &GeoPoint, radius_km: f64) -> Vec<RankedCandidate> {
        rank(self.directory.list_available(center, radius_km), &self.matching.weights)
    }

    fn validate_radius(&self, radius_km: f64) -> Result<f64, VetlineError> {
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(VetlineError::validation("radius_km must be greater than 0"));
        }
        if radius_km > self.matching.max_radius_km {
            return Err(VetlineError::validation(format!(
                "radius_km must not exceed {} km",
                self.matching.max_radius_km
            )));
        }
        Ok(radius_km)
    }

    /// Step the radius outward until a ring holds someone not yet notified,
    /// stopping at the ceiling even when it holds nobody new.
    fn escalate_locked(&self, session: &mut TriageSession, now: DateTime<Utc>) -> Result<(), VetlineError> {
        let step = self.matching.radius_step_km.max(0.0);
        let start = (session.search_radius_km() + step).min(self.matching.max_radius_km);
        let location = session.request().requester_location;

        let mut radius_km = start;
        let mut fresh = Vec::new();
        for radius in self.matching.radius_schedule(start) {
            radius_km = radius;
            fresh = self
                .ranked(&location, radius)
                .into_iter()
                .filter(|c| !session.is_notified(&c.responder.id))
                .take(self.matching.notify_top_k.max(1))
                .collect::<Vec<RankedCandidate>>();
            if !fresh.is_empty() {
                break;
            }
        }
        let ids = fresh.iter().map(|c| c.responder.id.clone()).collect();
        session.notify(radius_km, ids, now)?;

        for candidate in &fresh {
            self.notifier.deliver(
                &candidate.responder.id,
                emergency_notice(session.request(), candidate.distance_km),
            );
        }
        tracing::info!(
            request_id = %session.id(),
            radius_km,
            notified = fresh.len(),
            "No acceptance yet, search widened"
        );
        Ok(())
    }

    /// Close and hand the matched responder back to the pool.
    fn close_locked(&self, session: &mut TriageSession, reason: CloseReason, now: DateTime<Utc>) -> Result<bool, VetlineError> {
        if !session.close(reason, now)? {
            return Ok(false);
        }
        let request_id = session.id();
        if let Some(responder_id) = session.selected_responder_id() {
            self.directory.release(responder_id)?;
            self.notifier
                .deliver(responder_id, ResponderNotice::SessionClosed { request_id, reason });
        }
        tracing::info!(request_id = %request_id, reason = ?reason, "Session closed");
        Ok(true)
    }
}

fn emergency_notice(request: &EmergencyRequest, distance_km: f64) -> ResponderNotice {
    ResponderNotice::EmergencyRequested {
        request_id: request.id,
        pet_name: request.pet.name.clone(),
        species: request.pet.species,
        description: request.description.clone(),
        distance_km,
    }
}

// ============================================================================
// TESTS
// ============================================================================
