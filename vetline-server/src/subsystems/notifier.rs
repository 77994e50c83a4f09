//! Responder notifications.
//!
//! Delivery is behind the `Notifier` trait; the in-process `InboxNotifier`
//! queues notices per responder until they are fetched. Each inbox holds at
//! most `INBOX_CAPACITY` notices and drops the oldest beyond that.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vetline_core::models::{CloseReason, Species};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponderNotice {
    EmergencyRequested {
        request_id: Uuid,
        pet_name: String,
        species: Species,
        description: String,
        distance_km: f64,
    },
    /// Another responder accepted first.
    ResponderTooLate { request_id: Uuid },
    SessionClosed {
        request_id: Uuid,
        reason: CloseReason,
    },
}

impl ResponderNotice {
    pub fn request_id(&self) -> Uuid {
        match self {
            ResponderNotice::EmergencyRequested { request_id, .. }
            | ResponderNotice::ResponderTooLate { request_id }
            | ResponderNotice::SessionClosed { request_id, .. } => *request_id,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn deliver(&self, responder_id: &str, notice: ResponderNotice);

    /// Take every queued notice for a responder, oldest first.
    fn drain(&self, responder_id: &str) -> Vec<ResponderNotice>;

    /// Discard undelivered notices about a request that no longer exists.
    fn forget(&self, request_id: Uuid);
}

pub const INBOX_CAPACITY: usize = 50;

#[derive(Debug)]
pub struct InboxNotifier {
    inboxes: Mutex<HashMap<String, VecDeque<ResponderNotice>>>,
    capacity: usize,
}

impl Default for InboxNotifier {
    fn default() -> Self {
        Self::with_capacity(INBOX_CAPACITY)
    }
}

impl InboxNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inboxes: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }
}

impl Notifier for InboxNotifier {
    fn deliver(&self, responder_id: &str, notice: ResponderNotice) {
        tracing::info!(
            responder_id = %responder_id,
            request_id = %notice.request_id(),
            notice = ?notice,
            "Notice queued"
        );
        let mut inboxes = self.inboxes.lock().unwrap_or_else(|e| e.into_inner());
        let inbox = inboxes.entry(responder_id.to_string()).or_default();
        inbox.push_back(notice);
        while inbox.len() > self.capacity {
            if let Some(dropped) = inbox.pop_front() {
                tracing::warn!(
                    responder_id = %responder_id,
                    request_id = %dropped.request_id(),
                    "Inbox full, oldest notice dropped"
                );
            }
        }
    }

    fn drain(&self, responder_id: &str) -> Vec<ResponderNotice> {
        self.inboxes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(responder_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    fn forget(&self, request_id: Uuid) {
        let mut inboxes = self.inboxes.lock().unwrap_or_else(|e| e.into_inner());
        for inbox in inboxes.values_mut() {
            inbox.retain(|n| n.request_id() != request_id);
        }
        inboxes.retain(|_, inbox| !inbox.is_empty());
    }
}
