mod common;

use common::{auth_header, init_agent, test_client};
use rocket::http::{ContentType, Status};
use serde_json::Value;

/// S1: mail roundtrip, then explicit ack clears unread.
#[test]
fn mail_roundtrip_and_ack() {
    let client = test_client();
    let alice = init_agent(&client, "org-a", "alice");
    let bob = init_agent(&client, "org-a", "bob");

    let res = client
        .post("/v1/messages")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"to_alias":"bob","subject":"hi","body":"hello"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let sent: Value = res.into_json().unwrap();
    let message_id = sent["message_id"].as_str().unwrap().to_string();
    assert_eq!(sent["from_alias"], "alice");

    let res = client
        .get("/v1/messages/inbox?unread_only=true")
        .header(auth_header(&bob.api_key))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let inbox: Vec<Value> = res.into_json().unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0]["from_alias"], "alice");
    assert_eq!(inbox[0]["subject"], "hi");
    assert_eq!(inbox[0]["body"], "hello");
    assert!(inbox[0]["read_at"].is_null());

    let res = client
        .post(format!("/v1/messages/{message_id}/ack"))
        .header(auth_header(&bob.api_key))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .get("/v1/messages/inbox?unread_only=true")
        .header(auth_header(&bob.api_key))
        .dispatch();
    let inbox: Vec<Value> = res.into_json().unwrap();
    assert!(inbox.is_empty());
}

#[test]
fn inbox_is_read_only_until_explicit_ack() {
    let client = test_client();
    let alice = init_agent(&client, "org-b", "alice");
    let bob = init_agent(&client, "org-b", "bob");

    client
        .post("/v1/messages")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"to_alias":"bob","subject":"s","body":"b"}"#)
        .dispatch();

    for _ in 0..3 {
        let res = client
            .get("/v1/messages/inbox?unread_only=true")
            .header(auth_header(&bob.api_key))
            .dispatch();
        let inbox: Vec<Value> = res.into_json().unwrap();
        assert_eq!(inbox.len(), 1, "repeated inbox reads must not mark anything read");
    }
}

#[test]
fn send_to_unknown_alias_is_not_found() {
    let client = test_client();
    let alice = init_agent(&client, "org-c", "alice");

    let res = client
        .post("/v1/messages")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"to_alias":"ghost","subject":"s","body":"b"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn cannot_mail_across_tenants_by_alias() {
    let client = test_client();
    let alice = init_agent(&client, "org-d", "alice");
    init_agent(&client, "org-e", "bob");

    // "bob" exists, but in a different tenant than alice's key is scoped to.
    let res = client
        .post("/v1/messages")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"to_alias":"bob","subject":"s","body":"b"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn ack_unknown_message_is_not_found() {
    let client = test_client();
    let alice = init_agent(&client, "org-f", "alice");

    let res = client
        .post("/v1/messages/does-not-exist/ack")
        .header(auth_header(&alice.api_key))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
