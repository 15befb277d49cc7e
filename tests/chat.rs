mod common;

use common::{auth_header, init_agent, test_client};
use rocket::http::{ContentType, Status};
use serde_json::Value;

/// S2: a session created from either direction with the same participant set
/// resolves to the same session_id.
#[test]
fn session_is_reused_regardless_of_who_starts_it() {
    let client = test_client();
    let alice = init_agent(&client, "org-g", "alice");
    let bob = init_agent(&client, "org-g", "bob");

    let res = client
        .post("/v1/chat/sessions")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"to_aliases":["bob"],"message":"hey"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let first: Value = res.into_json().unwrap();
    let session_id = first["session_id"].as_str().unwrap().to_string();

    let res = client
        .post("/v1/chat/sessions")
        .header(ContentType::JSON)
        .header(auth_header(&bob.api_key))
        .body(r#"{"to_aliases":["alice"],"message":"back"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let second: Value = res.into_json().unwrap();
    assert_eq!(second["session_id"].as_str().unwrap(), session_id);

    let res = client
        .get(format!("/v1/chat/sessions/{session_id}/messages"))
        .header(auth_header(&alice.api_key))
        .dispatch();
    let messages: Vec<Value> = res.into_json().unwrap();
    assert_eq!(messages.len(), 2);
    let ids: std::collections::HashSet<_> = messages.iter().map(|m| m["message_id"].as_str().unwrap()).collect();
    assert_eq!(ids.len(), 2, "each send must mint a distinct message id");
}

/// S3: a reply in the same session advances the replier's read cursor past
/// what they were sent, so `/v1/chat/pending` stops listing it as unread.
#[test]
fn reply_advances_read_receipt() {
    let client = test_client();
    let alice = init_agent(&client, "org-h", "alice");
    let bob = init_agent(&client, "org-h", "bob");

    let res = client
        .post("/v1/chat/sessions")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"to_aliases":["bob"],"message":"hey"}"#)
        .dispatch();
    let created: Value = res.into_json().unwrap();
    let session_id = created["session_id"].as_str().unwrap().to_string();

    let res = client.get("/v1/chat/pending").header(auth_header(&bob.api_key)).dispatch();
    let pending: Vec<Value> = res.into_json().unwrap();
    let entry = pending.iter().find(|p| p["session_id"] == session_id).expect("session pending for bob");
    assert_eq!(entry["unread_count"], 1);

    let res = client
        .post(format!("/v1/chat/sessions/{session_id}/messages"))
        .header(ContentType::JSON)
        .header(auth_header(&bob.api_key))
        .body(r#"{"body":"back"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get("/v1/chat/pending").header(auth_header(&bob.api_key)).dispatch();
    let pending: Vec<Value> = res.into_json().unwrap();
    assert!(
        pending.iter().all(|p| p["session_id"] != session_id),
        "replying should clear bob's own pending entry for this session"
    );
}

/// S4 (replay half): a stream opened with `after` before the first message
/// and a short deadline replays the already-sent message, then closes.
#[test]
fn stream_replays_messages_sent_before_it_opened() {
    let client = test_client();
    let alice = init_agent(&client, "org-i", "alice");
    let bob = init_agent(&client, "org-i", "bob");

    let res = client
        .post("/v1/chat/sessions")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"to_aliases":["bob"],"message":"m1"}"#)
        .dispatch();
    let created: Value = res.into_json().unwrap();
    let session_id = created["session_id"].as_str().unwrap().to_string();

    let res = client
        .get(format!("/v1/chat/sessions/{session_id}/messages"))
        .header(auth_header(&bob.api_key))
        .dispatch();
    let history: Vec<Value> = res.into_json().unwrap();
    let message_id = history[0]["message_id"].as_str().unwrap().to_string();

    let res = client
        .get(format!("/v1/chat/sessions/{session_id}/stream?deadline=1&after=1970-01-01T00:00:00Z"))
        .header(auth_header(&bob.api_key))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body = res.into_string().unwrap();
    assert!(body.contains("event: message"));
    assert!(body.contains(&message_id));
}

#[test]
fn non_participant_cannot_open_stream() {
    let client = test_client();
    let alice = init_agent(&client, "org-j", "alice");
    let bob = init_agent(&client, "org-j", "bob");
    let eve = init_agent(&client, "org-j", "eve");

    let res = client
        .post("/v1/chat/sessions")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"to_aliases":["bob"],"message":"hey"}"#)
        .dispatch();
    let created: Value = res.into_json().unwrap();
    let session_id = created["session_id"].as_str().unwrap().to_string();

    let res = client
        .get(format!("/v1/chat/sessions/{session_id}/stream?deadline=1"))
        .header(auth_header(&eve.api_key))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}
