mod common;

use common::{auth_header, init_agent, test_client};
use rocket::http::{ContentType, Status};
use serde_json::Value;

/// S5: acquire/conflict/release-conflict/release/acquire cycle over one key.
#[test]
fn reservation_conflict_cycle() {
    let client = test_client();
    let alice = init_agent(&client, "org-k", "alice");
    let bob = init_agent(&client, "org-k", "bob");

    let res = client
        .post("/v1/reservations")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"resource_key":"src/main.py","ttl_seconds":60}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let reservation: Value = res.into_json().unwrap();
    assert_eq!(reservation["resource_key"], "src/main.py");
    assert_eq!(reservation["holder_alias"], "alice");

    let res = client
        .post("/v1/reservations")
        .header(ContentType::JSON)
        .header(auth_header(&bob.api_key))
        .body(r#"{"resource_key":"src/main.py","ttl_seconds":60}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
    let body = res.into_string().unwrap();
    assert!(body.contains("alice"));

    let res = client
        .post("/v1/reservations/release")
        .header(ContentType::JSON)
        .header(auth_header(&bob.api_key))
        .body(r#"{"resource_key":"src/main.py"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);

    let res = client
        .post("/v1/reservations/release")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"resource_key":"src/main.py"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .post("/v1/reservations")
        .header(ContentType::JSON)
        .header(auth_header(&bob.api_key))
        .body(r#"{"resource_key":"src/main.py","ttl_seconds":60}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let reservation: Value = res.into_json().unwrap();
    assert_eq!(reservation["holder_alias"], "bob");
}

#[test]
fn ttl_outside_bounds_is_clamped_not_rejected() {
    let client = test_client();
    let alice = init_agent(&client, "org-l", "alice");

    let res = client
        .post("/v1/reservations")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"resource_key":"k","ttl_seconds":5}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    client
        .post("/v1/reservations/release")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"resource_key":"k"}"#)
        .dispatch();

    let res = client
        .post("/v1/reservations")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"resource_key":"k","ttl_seconds":999999}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn renew_requires_ownership() {
    let client = test_client();
    let alice = init_agent(&client, "org-m", "alice");
    let bob = init_agent(&client, "org-m", "bob");

    client
        .post("/v1/reservations")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"resource_key":"shared","ttl_seconds":60}"#)
        .dispatch();

    let res = client
        .post("/v1/reservations/renew")
        .header(ContentType::JSON)
        .header(auth_header(&bob.api_key))
        .body(r#"{"resource_key":"shared","ttl_seconds":60}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    let res = client
        .post("/v1/reservations/renew")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"resource_key":"shared","ttl_seconds":60}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}
