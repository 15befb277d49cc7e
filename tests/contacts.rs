mod common;

use common::{auth_header, init_agent, test_client};
use rocket::http::{ContentType, Status};
use serde_json::Value;

#[test]
fn add_list_remove_contact() {
    let client = test_client();
    let alice = init_agent(&client, "org-s", "alice");

    let res = client
        .post("/v1/contacts")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"address":"org-t/bob","label":"bob from org-t"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let contact: Value = res.into_json().unwrap();
    let contact_id = contact["contact_id"].as_str().unwrap().to_string();

    let res = client.get("/v1/contacts").header(auth_header(&alice.api_key)).dispatch();
    let contacts: Vec<Value> = res.into_json().unwrap();
    assert_eq!(contacts.len(), 1);

    let res = client
        .delete(format!("/v1/contacts/{contact_id}"))
        .header(auth_header(&alice.api_key))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get("/v1/contacts").header(auth_header(&alice.api_key)).dispatch();
    let contacts: Vec<Value> = res.into_json().unwrap();
    assert!(contacts.is_empty());
}

#[test]
fn cannot_add_duplicate_contact() {
    let client = test_client();
    let alice = init_agent(&client, "org-u", "alice");

    client
        .post("/v1/contacts")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"address":"org-v/bob"}"#)
        .dispatch();

    let res = client
        .post("/v1/contacts")
        .header(ContentType::JSON)
        .header(auth_header(&alice.api_key))
        .body(r#"{"address":"org-v/bob"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}
