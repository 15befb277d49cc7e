mod common;

use common::{auth_header, init_agent, test_client};
use rocket::http::{ContentType, Status};
use serde_json::Value;

#[test]
fn conversations_merges_mail_and_chat_newest_first() {
    let client = test_client();
    let alice = init_agent(&client, "org-ee", "alice");
    let bob = init_agent(&client, "org-ee", "bob");

    client
        .post("/v1/messages")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"to_alias":"bob","subject":"s","body":"mail body"}"#)
        .dispatch();

    client
        .post("/v1/chat/sessions")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"to_aliases":["bob"],"message":"chat body"}"#)
        .dispatch();

    let res = client.get("/v1/conversations").header(auth_header(&bob.api_key)).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let conversations: Vec<Value> = res.into_json().unwrap();
    assert_eq!(conversations.len(), 2);
    let kinds: std::collections::HashSet<_> = conversations.iter().map(|c| c["kind"].as_str().unwrap()).collect();
    assert!(kinds.contains("mail"));
    assert!(kinds.contains("chat"));
    // chat was created after mail, so it sorts first.
    assert_eq!(conversations[0]["kind"], "chat");
}
