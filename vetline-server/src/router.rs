use serde::Serialize;
use vetline_core::ipc::{GatewayRequest, GatewayResponse};
use vetline_core::VetlineError;

use crate::subsystems::gateway::Gateway;

/// Dispatch one gateway request. Shared by the IPC server and the HTTP layer.
pub async fn handle_request(request: GatewayRequest, gateway: &Gateway) -> GatewayResponse {
    match request {
        GatewayRequest::Ping => GatewayResponse::pong(),
        GatewayRequest::Health => respond(Ok(gateway.health().await)),
        GatewayRequest::SubmitRequest(input) => respond(gateway.submit_request(input).await),
        GatewayRequest::ListCandidates {
            request_id,
            radius_km,
        } => respond(
            gateway
                .list_candidates(request_id, radius_km)
                .await
                .map(|candidates| {
                    serde_json::json!({
                        "request_id": request_id,
                        "count": candidates.len(),
                        "candidates": candidates,
                    })
                }),
        ),
        GatewayRequest::SelectResponder {
            request_id,
            responder_id,
        } => respond(gateway.select_responder(request_id, &responder_id).await),
        GatewayRequest::PostMessage {
            request_id,
            sender,
            content,
            responder_id,
        } => respond(
            gateway
                .post_message(request_id, &sender, &content, responder_id.as_deref())
                .await,
        ),
        GatewayRequest::GetMessages { request_id, after } => respond(
            gateway
                .get_messages(request_id, after)
                .await
                .map(|messages| {
                    serde_json::json!({
                        "request_id": request_id,
                        "count": messages.len(),
                        "messages": messages,
                    })
                }),
        ),
        GatewayRequest::GetSession { request_id } => respond(gateway.get_session(request_id).await),
        GatewayRequest::CloseSession {
            request_id,
            by,
            responder_id,
        } => respond(
            gateway
                .close_session(request_id, &by, responder_id.as_deref())
                .await,
        ),
        GatewayRequest::SetAvailability {
            responder_id,
            availability,
        } => respond(gateway.set_availability(&responder_id, &availability).await),
        GatewayRequest::PendingNotifications { responder_id } => respond(
            gateway
                .pending_notifications(&responder_id)
                .await
                .map(|notices| {
                    serde_json::json!({
                        "responder_id": responder_id,
                        "notifications": notices,
                    })
                }),
        ),
    }
}

fn respond<T: Serialize>(result: Result<T, VetlineError>) -> GatewayResponse {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(data) => GatewayResponse::ok(data),
            Err(e) => GatewayResponse::err(format!("Serialization error: {}", e)),
        },
        Err(e) => {
            tracing::debug!(code = e.code(), error = %e, "Gateway request rejected");
            GatewayResponse::from_error(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;
    use vetline_core::config::{MatchingConfig, SessionConfig};
    use vetline_core::{Assistant, ResponderDirectory};

    use crate::subsystems::notifier::InboxNotifier;

    fn empty_gateway() -> Gateway {
        Gateway::new(
            Arc::new(ResponderDirectory::new()),
            Assistant::scripted(),
            Arc::new(InboxNotifier::new()),
            MatchingConfig::default(),
            SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_ping() {
        let resp = handle_request(GatewayRequest::Ping, &empty_gateway()).await;
        assert!(resp.is_ok());
        assert_eq!(resp.data.unwrap()["pong"], true);
    }

    #[tokio::test]
    async fn test_unknown_session_maps_to_not_found() {
        let resp = handle_request(
            GatewayRequest::GetSession {
                request_id: Uuid::new_v4(),
            },
            &empty_gateway(),
        )
        .await;
        assert!(!resp.is_ok());
        assert_eq!(resp.code.as_deref(), Some("not_found"));
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let resp = handle_request(GatewayRequest::Health, &empty_gateway()).await;
        let data = resp.data.unwrap();
        assert_eq!(data["status"], "healthy");
        assert_eq!(data["responders"], 0);
    }
}
