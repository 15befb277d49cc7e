mod common;

use aweb::identity::did::did_from_public_key;
use aweb::identity::signing::{canonical_payload, generate_keypair, sign};
use common::{auth_header, test_client};
use rocket::http::{ContentType, Status};
use serde_json::{json, Value};

fn init_with_keypair(client: &rocket::local::blocking::Client, slug: &str, alias: &str) -> (Value, [u8; 32]) {
    let (seed, public_key) = generate_keypair();
    let did = did_from_public_key(&public_key);
    let res = client
        .post("/v1/init")
        .header(ContentType::JSON)
        .body(
            json!({
                "project_slug": slug,
                "project_name": format!("{slug} inc"),
                "alias": alias,
                "did": did,
                "public_key": hex::encode(public_key),
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    (res.into_json().unwrap(), seed)
}

/// S6: rotating a DID attaches a rotation announcement to the next mail the
/// rotated agent sends its peer, and the peer's reply acks it so later mail
/// carries no announcement.
#[test]
fn rotation_is_announced_once_then_acked() {
    let client = test_client();
    let (alice, old_seed) = init_with_keypair(&client, "org-n", "alice");
    let alice_api_key = alice["api_key"].as_str().unwrap();
    let alice_id = alice["agent_id"].as_str().unwrap();

    let res = client
        .post("/v1/init")
        .header(ContentType::JSON)
        .body(r#"{"project_slug":"org-n","project_name":"org-n inc","alias":"bob"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let bob: Value = res.into_json().unwrap();
    let bob_api_key = bob["api_key"].as_str().unwrap();

    let res = client
        .get(format!("/v1/agents/resolve/org-n/alice"))
        .header(auth_header(bob_api_key))
        .dispatch();
    let alice_public: Value = res.into_json().unwrap();
    let old_did = alice_public["did"].as_str().unwrap().to_string();

    let (_new_seed, new_public_key) = generate_keypair();
    let new_did = did_from_public_key(&new_public_key);
    let timestamp = "2026-01-01T00:00:00Z";
    let mut fields = serde_json::Map::new();
    fields.insert("new_did".to_string(), json!(new_did));
    fields.insert("old_did".to_string(), json!(old_did));
    fields.insert("timestamp".to_string(), json!(timestamp));
    let payload = canonical_payload(&fields);
    let rotation_signature = sign(&old_seed, &payload);

    let res = client
        .put(format!("/v1/agents/{alice_id}/rotate"))
        .header(ContentType::JSON)
        .header(auth_header(alice_api_key))
        .body(
            json!({
                "new_did": new_did,
                "new_public_key": hex::encode(new_public_key),
                "rotation_signature": rotation_signature,
                "timestamp": timestamp,
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    client
        .post("/v1/messages")
        .header(ContentType::JSON)
        .header(auth_header(alice_api_key))
        .body(r#"{"to_alias":"bob","subject":"s1","body":"after rotation"}"#)
        .dispatch();

    let res = client
        .get("/v1/messages/inbox?unread_only=true")
        .header(auth_header(bob_api_key))
        .dispatch();
    let inbox: Vec<Value> = res.into_json().unwrap();
    let msg = inbox.iter().find(|m| m["subject"] == "s1").expect("rotation mail present");
    let announcement = &msg["rotation_announcement"];
    assert!(!announcement.is_null(), "first mail after rotation should carry an announcement");
    assert_eq!(announcement["old_did"], old_did);
    assert_eq!(announcement["new_did"], new_did);

    // bob replying acks the rotation for the alice -> bob direction.
    client
        .post("/v1/messages")
        .header(ContentType::JSON)
        .header(auth_header(bob_api_key))
        .body(r#"{"to_alias":"alice","subject":"r1","body":"ack"}"#)
        .dispatch();

    client
        .post("/v1/messages")
        .header(ContentType::JSON)
        .header(auth_header(alice_api_key))
        .body(r#"{"to_alias":"bob","subject":"s2","body":"after ack"}"#)
        .dispatch();

    let res = client
        .get("/v1/messages/inbox?unread_only=true")
        .header(auth_header(bob_api_key))
        .dispatch();
    let inbox: Vec<Value> = res.into_json().unwrap();
    let msg2 = inbox.iter().find(|m| m["subject"] == "s2").expect("post-ack mail present");
    assert!(msg2["rotation_announcement"].is_null(), "announcement must not repeat once acked");
}

#[test]
fn rotation_without_did_bootstrap_requires_valid_signature() {
    let client = test_client();
    let res = client
        .post("/v1/init")
        .header(ContentType::JSON)
        .body(r#"{"project_slug":"org-o","project_name":"org-o inc","alias":"alice"}"#)
        .dispatch();
    let alice: Value = res.into_json().unwrap();
    let alice_api_key = alice["api_key"].as_str().unwrap();
    let alice_id = alice["agent_id"].as_str().unwrap();

    let (_seed, public_key) = generate_keypair();
    let new_did = did_from_public_key(&public_key);

    let res = client
        .put(format!("/v1/agents/{alice_id}/rotate"))
        .header(ContentType::JSON)
        .header(auth_header(alice_api_key))
        .body(
            json!({
                "new_did": new_did,
                "new_public_key": hex::encode(public_key),
                "timestamp": "2026-01-01T00:00:00Z",
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(res.status(), Status::UnprocessableEntity);
}
