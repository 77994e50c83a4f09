//! Gateway + HTTP assistant backend, against a wiremock completion endpoint.

use std::collections::BTreeSet;
use std::sync::Arc;

use vetline_core::config::{AssistantConfig, MatchingConfig, SessionConfig};
use vetline_core::models::{Availability, PetProfileInput, Responder, Sender, SubmitRequestInput};
use vetline_core::{Assistant, GeoPoint, ResponderDirectory, FALLBACK_REPLY, POLICY_SAFE_REPLY};
use vetline_server::subsystems::gateway::Gateway;
use vetline_server::subsystems::notifier::InboxNotifier;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http_assistant(base_url: &str) -> Assistant {
    Assistant::from_config(&AssistantConfig {
        backend: "http".to_string(),
        base_url: base_url.to_string(),
        model: "test-model".to_string(),
        api_key: Some("test-key".to_string()),
        max_retries: 1,
        retry_delay_ms: 10,
        timeout_secs: 2,
    })
    .unwrap()
}

fn gateway(assistant: Assistant) -> Gateway {
    let vet = Responder {
        id: "vet-1".to_string(),
        name: "Dra. Ana Martínez".to_string(),
        specialties: BTreeSet::new(),
        equipment: BTreeSet::new(),
        location: GeoPoint::new(-34.5875, -58.3916),
        rating_average: 5.0,
        rating_count: 156,
        availability: Availability::Available,
        experience_years: 15,
        response_minutes: 8,
    };
    Gateway::new(
        Arc::new(ResponderDirectory::from_responders(vec![vet]).unwrap()),
        assistant,
        Arc::new(InboxNotifier::new()),
        MatchingConfig::default(),
        SessionConfig::default(),
    )
}

fn submission() -> SubmitRequestInput {
    SubmitRequestInput {
        description: "my cat is hiding and crying".to_string(),
        pet: PetProfileInput {
            name: "Luna".to_string(),
            species: "cat".to_string(),
            age: "2".to_string(),
        },
        location: Some(GeoPoint::new(-34.5880, -58.3920)),
        radius_km: None,
    }
}

fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    })
}

// ===========================================================================
// TEST 1: a failing backend yields the fallback reply, never an error
// ===========================================================================
#[tokio::test]
async fn test_backend_failure_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let gw = gateway(http_assistant(&server.uri()));
    let id = gw.submit_request(submission()).await.unwrap().request_id;

    let outcome = gw
        .post_message(id, "requester", "She won't come out from under the bed", None)
        .await
        .unwrap();
    let reply = outcome.assistant_reply.expect("fallback reply expected");
    assert_eq!(reply.sender, Sender::Assistant);
    assert_eq!(reply.content, FALLBACK_REPLY);
}

// ===========================================================================
// TEST 2: diagnosing replies are replaced before they reach the log
// ===========================================================================
#[tokio::test]
async fn test_policy_rewrites_backend_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("Your cat has a urinary blockage. Give her 5 mg of meloxicam.")),
        )
        .mount(&server)
        .await;

    let gw = gateway(http_assistant(&server.uri()));
    let id = gw.submit_request(submission()).await.unwrap().request_id;

    let reply = gw
        .post_message(id, "requester", "She keeps going to the litter box", None)
        .await
        .unwrap()
        .assistant_reply
        .unwrap();
    assert_eq!(reply.content, POLICY_SAFE_REPLY);

    let log = gw.get_messages(id, None).await.unwrap();
    assert!(log.iter().all(|m| !m.content.contains("meloxicam")));
}

// ===========================================================================
// TEST 3: an advisory reply passes through unchanged
// ===========================================================================
#[tokio::test]
async fn test_advisory_reply_passes() {
    let server = MockServer::start().await;
    let advice = "Keep the room quiet and dim, and let her stay where she feels safe until the veterinarian calls.";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(advice)))
        .expect(1)
        .mount(&server)
        .await;

    let gw = gateway(http_assistant(&server.uri()));
    let id = gw.submit_request(submission()).await.unwrap().request_id;

    let reply = gw
        .post_message(id, "requester", "What should I do?", None)
        .await
        .unwrap()
        .assistant_reply
        .unwrap();
    assert_eq!(reply.content, advice);
}
