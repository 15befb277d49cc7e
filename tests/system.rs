mod common;

use common::{auth_header, init_agent, test_client};
use rocket::http::Status;
use serde_json::Value;

#[test]
fn health_is_public() {
    let client = test_client();
    let res = client.get("/v1/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
}

#[test]
fn introspect_requires_auth() {
    let client = test_client();
    let res = client.get("/v1/auth/introspect").dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn introspect_reports_bound_agent() {
    let client = test_client();
    let alice = init_agent(&client, "org-p", "alice");

    let res = client.get("/v1/auth/introspect").header(auth_header(&alice.api_key)).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: Value = res.into_json().unwrap();
    assert_eq!(body["agent_id"], alice.agent_id);
    assert_eq!(body["alias"], "alice");
    assert_eq!(body["project_id"], alice.project_id);
}

#[test]
fn stats_are_scoped_per_tenant() {
    let client = test_client();
    let alice = init_agent(&client, "org-q", "alice");
    init_agent(&client, "org-r", "carol");

    let res = client.get("/v1/stats").header(auth_header(&alice.api_key)).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let stats: Value = res.into_json().unwrap();
    assert_eq!(stats["agents"], 1, "org-r's agent must not be counted in org-q's stats");
}

#[test]
fn unknown_route_returns_not_found_body() {
    let client = test_client();
    let res = client.get("/v1/does-not-exist").dispatch();
    assert_eq!(res.status(), Status::NotFound);
    let body: Value = res.into_json().unwrap();
    assert_eq!(body["detail"], "not found");
}
