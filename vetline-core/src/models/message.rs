use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VetlineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    Requester,
    Assistant,
    Responder,
    System,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Sender::Requester => "requester",
            Sender::Assistant => "assistant",
            Sender::Responder => "responder",
            Sender::System => "system",
        };
        f.write_str(s)
    }
}

impl FromStr for Sender {
    type Err = VetlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "requester" => Ok(Sender::Requester),
            "assistant" => Ok(Sender::Assistant),
            "responder" => Ok(Sender::Responder),
            "system" => Ok(Sender::System),
            other => Err(VetlineError::validation(format!("unknown sender '{}'", other))),
        }
    }
}

/// A message in a triage session's log. `seq` is assigned by the session and
/// is the only ordering key; `sent_at` is informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub seq: u64,
    pub sender: Sender,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Message content awaiting a sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub sender: Sender,
    pub content: String,
}

impl MessageDraft {
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Sender::System, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Sender::Assistant, content)
    }
}
