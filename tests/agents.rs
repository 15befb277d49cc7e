mod common;

use common::{auth_header, init_agent, test_client};
use rocket::http::Status;
use serde_json::Value;

#[test]
fn resolve_agent_returns_public_view_without_key_status() {
    let client = test_client();
    let alice = init_agent(&client, "org-w", "alice");
    let bob = init_agent(&client, "org-w", "bob");

    let res = client
        .get("/v1/agents/resolve/org-w/alice")
        .header(auth_header(&bob.api_key))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: Value = res.into_json().unwrap();
    assert_eq!(body["alias"], "alice");
    assert_eq!(body["agent_id"], alice.agent_id);
    assert!(body.get("api_key").is_none());
    assert!(body.get("is_active").is_none());
}

#[test]
fn resolve_agent_unknown_tenant_is_not_found() {
    let client = test_client();
    let bob = init_agent(&client, "org-x", "bob");

    let res = client
        .get("/v1/agents/resolve/does-not-exist/alice")
        .header(auth_header(&bob.api_key))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

/// Peer deregister targeting another tenant must look identical to a plain
/// miss: not-found, never forbidden, so the caller can't tell the peer exists.
#[test]
fn deregister_peer_across_tenants_is_not_found_not_forbidden() {
    let client = test_client();
    let alice = init_agent(&client, "org-y", "alice");
    init_agent(&client, "org-z", "bob");

    let res = client
        .delete("/v1/agents/org-z/bob")
        .header(auth_header(&alice.api_key))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn deregister_peer_same_tenant_persistent_agent_is_forbidden() {
    let client = test_client();
    let alice = init_agent(&client, "org-aa", "alice");
    init_agent(&client, "org-aa", "bob");

    // Default-bootstrapped agents are persistent; peer deregister of a
    // persistent agent is rejected (retire is the correct operation instead).
    let res = client
        .delete("/v1/agents/org-aa/bob")
        .header(auth_header(&alice.api_key))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn list_agents_is_scoped_per_tenant() {
    let client = test_client();
    let alice = init_agent(&client, "org-bb", "alice");
    init_agent(&client, "org-bb", "bob");
    init_agent(&client, "org-cc", "carol");

    let res = client.get("/v1/agents").header(auth_header(&alice.api_key)).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let agents: Vec<Value> = res.into_json().unwrap();
    let aliases: Vec<&str> = agents.iter().map(|a| a["alias"].as_str().unwrap()).collect();
    assert!(aliases.contains(&"alice"));
    assert!(aliases.contains(&"bob"));
    assert!(!aliases.contains(&"carol"));
}

#[test]
fn suggest_alias_prefix_avoids_collisions() {
    let client = test_client();
    let alice = init_agent(&client, "org-dd", "alice");

    let res = client
        .post("/v1/agents/suggest-alias-prefix")
        .header(rocket::http::ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"prefix":"agent"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: Value = res.into_json().unwrap();
    let suggested = body["suggested_prefix"].as_str().unwrap();
    assert_ne!(suggested, "alice");
}
