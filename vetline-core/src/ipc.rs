use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VetlineError;
use crate::models::SubmitRequestInput;

/// Gateway operations, shared by the Unix socket transport and the HTTP layer.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GatewayRequest {
    Ping,
    Health,
    SubmitRequest(SubmitRequestInput),
    ListCandidates {
        request_id: Uuid,
        radius_km: Option<f64>,
    },
    SelectResponder {
        request_id: Uuid,
        #[serde(default)]
        responder_id: String,
    },
    PostMessage {
        request_id: Uuid,
        #[serde(default)]
        sender: String,
        #[serde(default)]
        content: String,
        responder_id: Option<String>,
    },
    GetMessages {
        request_id: Uuid,
        after: Option<u64>,
    },
    GetSession {
        request_id: Uuid,
    },
    CloseSession {
        request_id: Uuid,
        #[serde(default)]
        by: String,
        responder_id: Option<String>,
    },
    SetAvailability {
        responder_id: String,
        #[serde(default)]
        availability: String,
    },
    PendingNotifications {
        responder_id: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GatewayResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Error code from `VetlineError::code`, present when `status == "error"`.
    pub code: Option<String>,
    pub version: String,
}

impl GatewayResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            code: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            code: Some("internal_error".to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn from_error(e: &VetlineError) -> Self {
        Self {
            code: Some(e.code().to_string()),
            ..Self::err(e.to_string())
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tagging() {
        let req: GatewayRequest = serde_json::from_value(serde_json::json!({
            "action": "submit_request",
            "description": "vomiting and lethargy",
            "pet": { "name": "Max", "species": "dog", "age": "5" },
            "location": { "lat": -34.6, "lng": -58.38 }
        }))
        .unwrap();
        match req {
            GatewayRequest::SubmitRequest(input) => {
                assert_eq!(input.description, "vomiting and lethargy");
                assert_eq!(input.pet.species, "dog");
                assert!(input.radius_km.is_none());
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_error_response_carries_code() {
        let resp = GatewayResponse::from_error(&VetlineError::conflict("already matched"));
        assert!(!resp.is_ok());
        assert_eq!(resp.code.as_deref(), Some("conflict"));
        assert_eq!(resp.error.as_deref(), Some("Conflict: already matched"));
    }
}
