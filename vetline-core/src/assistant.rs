//! Assistant responder - advisory chat while a requester waits for a veterinarian
//!
//! Provides an `AssistantBackend` trait with implementations for:
//! - **Scripted** - keyword triage rules plus rotating canned guidance (no network)
//! - **HTTP** - OpenAI-compatible `/chat/completions` endpoint, retried once
//!
//! `Assistant` wraps a backend and owns the two guarantees the session relies on:
//! backend failures become a deterministic fallback reply, and every reply passes
//! the advisory content policy (no diagnoses, no dosing instructions).

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::RegexSet;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use uuid::Uuid;

use crate::config::AssistantConfig;
use crate::error::VetlineError;
use crate::models::{ChatMessage, MessageDraft, Sender};

/// Sent when the backend cannot be reached.
pub const FALLBACK_REPLY: &str = "A veterinarian will reach you shortly. \
While you wait, keep your pet calm, warm and in a quiet place.";

/// Replaces backend output that breaks the advisory policy.
pub const POLICY_SAFE_REPLY: &str = "I can't say what is wrong with your pet; only a veterinarian can do that. \
Keep your pet calm and write down any change in its symptoms so you can share it with the veterinarian.";

/// First assistant message of every session.
pub const GREETING: &str = "Hi, I'm the Vetline assistant. While you wait for the veterinarian I can share \
general guidance. Can you describe your pet's symptoms in more detail?";

const SYSTEM_PROMPT: &str = "You are an assistant for a veterinary emergency service. A pet owner is \
waiting for a human veterinarian. Offer calm, general, practical guidance only. Never diagnose, never \
name a condition the pet has, never recommend medication or doses. Keep replies under 80 words.";

// ============================================================================
// AssistantBackend trait
// ============================================================================

/// Abstraction over reply generators.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Produce a reply to `message`. `history` holds the session log before it.
    async fn reply(&self, history: &[ChatMessage], message: &str) -> Result<String, AssistantError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Assistant backend errors
#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing reply in response")]
    EmptyReply,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Missing base URL for the HTTP assistant backend")]
    MissingBaseUrl,

    #[error("Unknown assistant backend '{0}'")]
    UnknownBackend(String),

    #[error("All {attempts} attempts failed")]
    RetryExhausted { attempts: usize },
}

impl From<AssistantError> for VetlineError {
    fn from(e: AssistantError) -> Self {
        VetlineError::AssistantUnavailable(e.to_string())
    }
}

/// Create the backend named in configuration.
pub fn create_backend(config: &AssistantConfig) -> Result<Arc<dyn AssistantBackend>, AssistantError> {
    match config.backend.trim().to_ascii_lowercase().as_str() {
        "scripted" => Ok(Arc::new(ScriptedAssistant)),
        "http" => Ok(Arc::new(HttpAssistantClient::new(config)?)),
        other => Err(AssistantError::UnknownBackend(other.to_string())),
    }
}

// ============================================================================
// ScriptedAssistant
// ============================================================================

struct TriageRule {
    keywords: &'static [&'static str],
    reply: &'static str,
}

const TRIAGE_RULES: &[TriageRule] = &[
    TriageRule {
        keywords: &["breath", "chok", "gasp", "respir"],
        reply: "Keep your pet still in a cool, well-ventilated spot and avoid pressing on its chest or neck. \
Don't put your hand in its mouth. Tell the veterinarian how many breaths it takes per minute if you can count them.",
    },
    TriageRule {
        keywords: &["bleed", "blood", "wound", "cut"],
        reply: "If there is bleeding, press gently on the area with a clean cloth and keep the pressure on. \
Keep your pet as still as possible until the veterinarian contacts you.",
    },
    TriageRule {
        keywords: &["poison", "toxic", "chocolate", "swallow", "ate ", "eaten"],
        reply: "Don't try to make your pet vomit unless a veterinarian tells you to. If you know what it \
swallowed, keep the packaging or a sample so the veterinarian can see it.",
    },
    TriageRule {
        keywords: &["seizure", "convuls", "shaking", "trembl"],
        reply: "Move objects away from your pet so it can't get hurt and don't hold it down or touch its mouth. \
Note how long each episode lasts; that will help the veterinarian.",
    },
    TriageRule {
        keywords: &["vomit", "diarrh", "letharg", "not eating", "weak"],
        reply: "Leave fresh water within reach and offer only small amounts at a time. Hold off on food until \
the veterinarian advises, and note how often the symptoms appear.",
    },
];

/// Canned guidance rotated through when no triage rule matches.
const CANNED_REPLIES: [&str; 4] = [
    "I understand. That can have several causes. Has your pet eaten anything unusual recently?",
    "It's important to stay calm. While we wait for the veterinarian, make sure fresh water is within your pet's reach.",
    "From what you describe, it's good that you asked for veterinary care. Have you noticed any change in your pet's behaviour?",
    "Remember to write down every symptom you notice. That information will be very useful for the veterinarian.",
];

/// Rule-based backend. Replies depend only on the history and the new message.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedAssistant;

impl ScriptedAssistant {
    pub fn reply_for(history: &[ChatMessage], message: &str) -> String {
        let lowered = format!("{} ", message.to_lowercase());
        let last_assistant = history
            .iter()
            .rev()
            .find(|m| m.sender == Sender::Assistant)
            .map(|m| m.content.as_str());

        let matched = TRIAGE_RULES
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| lowered.contains(k)))
            .map(|rule| rule.reply)
            .filter(|reply| last_assistant != Some(*reply));

        if let Some(reply) = matched {
            return reply.to_string();
        }

        let asked = history
            .iter()
            .filter(|m| m.sender == Sender::Requester)
            .count();
        CANNED_REPLIES[asked % CANNED_REPLIES.len()].to_string()
    }
}

#[async_trait]
impl AssistantBackend for ScriptedAssistant {
    async fn reply(&self, history: &[ChatMessage], message: &str) -> Result<String, AssistantError> {
        Ok(Self::reply_for(history, message))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Chat completion API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<CompletionMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct CompletionMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// HttpAssistantClient
// ============================================================================

/// Calls an OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone)]
pub struct HttpAssistantClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl HttpAssistantClient {
    pub fn new(config: &AssistantConfig) -> Result<Self, AssistantError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("VETLINE_ASSISTANT_API_KEY").ok())
            .unwrap_or_default();
        if api_key.is_empty() {
            return Err(AssistantError::MissingApiKey);
        }
        if config.base_url.trim().is_empty() {
            return Err(AssistantError::MissingBaseUrl);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    async fn reply_once(&self, history: &[ChatMessage], message: &str) -> Result<String, AssistantError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: completion_messages(history, message),
            temperature: 0.2,
            max_tokens: 300,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::warn!(code = status.as_u16(), message = %message, "Assistant API error");
            return Err(AssistantError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let completion: CompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(AssistantError::EmptyReply)
    }
}

#[async_trait]
impl AssistantBackend for HttpAssistantClient {
    async fn reply(&self, history: &[ChatMessage], message: &str) -> Result<String, AssistantError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.retry_delay_ms)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.max_retries);

        let attempts = self.max_retries + 1;
        Retry::spawn(retry_strategy, || self.reply_once(history, message))
            .await
            .map_err(|e| {
                tracing::warn!(attempts, error = %e, "All assistant attempts failed");
                AssistantError::RetryExhausted { attempts }
            })
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn completion_messages(history: &[ChatMessage], message: &str) -> Vec<CompletionMessage> {
    let mut messages = vec![CompletionMessage {
        role: "system".to_string(),
        content: SYSTEM_PROMPT.to_string(),
    }];
    messages.extend(history.iter().map(|m| {
        let (role, content) = match m.sender {
            Sender::Requester => ("user", m.content.clone()),
            Sender::Assistant => ("assistant", m.content.clone()),
            Sender::Responder => ("user", format!("[veterinarian] {}", m.content)),
            Sender::System => ("system", m.content.clone()),
        };
        CompletionMessage {
            role: role.to_string(),
            content,
        }
    }));
    messages.push(CompletionMessage {
        role: "user".to_string(),
        content: message.to_string(),
    });
    messages
}

// ============================================================================
// Advisory content policy
// ============================================================================

/// Condition words a reply must not attach to the pet.
const CONDITION: &str = r"(?:[a-z]*(?:itis|osis|virus)|parvo|distemper|diabetes|epilepsy|cancer|tumou?r|(?:kidney|liver|heart|renal|organ)\s+failure|infection|disease|blockage|obstruction|fracture|torsion|bloat|poisoning|toxicity)";

/// Drug and dosage-form words that must not follow a dosing verb.
const MEDICATION: &str = r"(?:tablets?|pills?|capsules?|drops|ibuprofen|paracetamol|acetaminophen|aspirin|meloxicam|carprofen|benadryl|diphenhydramine|antibiotics?|amoxicillin|metronidazole|prednisone|tramadol|gabapentin|omeprazole)";

static ADVISORY_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)\bdiagnos(?:is|ed|e|ing)\b".to_string(),
        r"(?i)\b(?:your|the)\s+(?:pet|dog|cat|bird|rabbit|animal)\s+(?:has|is suffering from|definitely has)\b".to_string(),
        r"(?i)\b(?:it|this|that)(?:['’]s|\s+is)\s+(?:most\s+)?(?:definitely|certainly|clearly|likely|probably|possibly|almost certainly)\b".to_string(),
        r"(?i)\b(?:likely|probably|possibly)\s+(?:has|have|is|got|suffering)\b".to_string(),
        format!(r"(?i)\b(?:sounds|looks|seems)\s+(?:like|to be)\s+(?:[a-z]+\s+){{0,3}}?{CONDITION}\b"),
        format!(r"(?i)\b(?:may|might|could)\s+(?:have|be)\s+(?:[a-z]+\s+){{0,3}}?{CONDITION}\b"),
        format!(r"(?i)\bhas\s+(?:[a-z]+\s+){{0,3}}?{CONDITION}\b"),
        r"(?i)\b(?:prescribe|prescription)\b".to_string(),
        r"(?i)\b\d+(?:\.\d+)?\s?(?:mg|ml|milligrams?|millilit(?:er|re)s?)\b".to_string(),
        format!(r"(?i)\b(?:give|giving|administer|dose)\b[^.!?]*?\b{MEDICATION}\b"),
    ])
    .expect("Invalid advisory policy pattern")
});

/// Rejects replies that diagnose or prescribe.
#[derive(Debug, Clone)]
pub struct AdvisoryPolicy {
    forbidden: RegexSet,
}

impl Default for AdvisoryPolicy {
    fn default() -> Self {
        Self {
            forbidden: ADVISORY_PATTERNS.clone(),
        }
    }
}

impl AdvisoryPolicy {
    pub fn violates(&self, reply: &str) -> bool {
        self.forbidden.is_match(reply)
    }

    /// The reply itself when it is advisory, otherwise the safe replacement.
    pub fn enforce(&self, reply: String) -> String {
        if self.violates(&reply) {
            tracing::warn!("Assistant reply rejected by advisory policy");
            POLICY_SAFE_REPLY.to_string()
        } else {
            reply
        }
    }
}

// ============================================================================
// Assistant
// ============================================================================

/// The advisory participant of a triage session. Holds no per-session state.
#[derive(Clone)]
pub struct Assistant {
    backend: Arc<dyn AssistantBackend>,
    policy: AdvisoryPolicy,
    timeout: Duration,
}

impl Assistant {
    pub fn new(backend: Arc<dyn AssistantBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            policy: AdvisoryPolicy::default(),
            timeout,
        }
    }

    pub fn scripted() -> Self {
        Self::new(Arc::new(ScriptedAssistant), Duration::from_secs(5))
    }

    pub fn from_config(config: &AssistantConfig) -> Result<Self, AssistantError> {
        let backend = create_backend(config)?;
        // The overall budget covers the first attempt, one retry and the backoff between them
        let timeout = Duration::from_secs(config.timeout_secs.max(1) * (config.max_retries as u64 + 1) + 2);
        Ok(Self::new(backend, timeout))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn greeting(&self) -> MessageDraft {
        MessageDraft::assistant(GREETING)
    }

    /// Ask the backend for a reply; failures surface as `AssistantUnavailable`.
    pub async fn try_respond(
        &self,
        session_id: Uuid,
        history: &[ChatMessage],
        message: &str,
    ) -> Result<MessageDraft, VetlineError> {
        let reply = tokio::time::timeout(self.timeout, self.backend.reply(history, message))
            .await
            .map_err(|_| {
                VetlineError::AssistantUnavailable(format!(
                    "{} backend timed out after {:?}",
                    self.backend.name(),
                    self.timeout
                ))
            })??;

        tracing::debug!(session_id = %session_id, backend = self.backend.name(), "Assistant replied");
        Ok(MessageDraft::assistant(self.policy.enforce(reply)))
    }

    /// Reply to a requester message. Never fails: backend errors become `FALLBACK_REPLY`.
    pub async fn respond(&self, session_id: Uuid, history: &[ChatMessage], message: &str) -> MessageDraft {
        match self.try_respond(session_id, history, message).await {
            Ok(draft) => draft,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Assistant unavailable, sending fallback");
                MessageDraft::assistant(FALLBACK_REPLY)
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
