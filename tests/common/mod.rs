use aweb::config::Config;
use rocket::http::{ContentType, Header, Status};
use rocket::local::blocking::Client;
use serde_json::Value;

/// Wrapper around `Client` that removes its tempfile-backed DB on drop.
pub struct TestClient {
    client: Option<Client>,
    db_path: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

fn temp_db_path() -> String {
    format!("/tmp/aweb_test_{}.db", uuid::Uuid::new_v4())
}

pub fn test_client() -> TestClient {
    let db_path = temp_db_path();
    let client = Client::tracked(aweb::rocket_with_db(&db_path)).expect("valid rocket instance");
    TestClient { client: Some(client), db_path }
}

/// A client built from a caller-supplied `Config`, for cases that need
/// custody keys or proxy-auth settings the default env-derived config won't have.
pub fn test_client_with_config(mut config: Config) -> TestClient {
    let db_path = temp_db_path();
    config.database_path = db_path.clone();
    let client = Client::tracked(aweb::rocket_with_config(config)).expect("valid rocket instance");
    TestClient { client: Some(client), db_path }
}

pub fn default_config() -> Config {
    Config {
        database_path: String::new(),
        custody_master_key: None,
        trust_proxy_headers: false,
        internal_auth_secret: None,
        server_url: None,
        presence_ttl_seconds: 1800,
        mutation_hook_url: None,
        mutation_hook_secret: None,
    }
}

pub struct Bootstrapped {
    pub api_key: String,
    pub agent_id: String,
    pub alias: String,
    pub project_id: String,
}

/// `POST /v1/init` for a fresh agent in `slug`; creates the tenant on first call.
pub fn init_agent(client: &Client, slug: &str, alias: &str) -> Bootstrapped {
    let res = client
        .post("/v1/init")
        .header(ContentType::JSON)
        .body(format!(r#"{{"project_slug":"{slug}","project_name":"{slug} inc","alias":"{alias}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: Value = res.into_json().unwrap();
    Bootstrapped {
        api_key: body["api_key"].as_str().unwrap().to_string(),
        agent_id: body["agent_id"].as_str().unwrap().to_string(),
        alias: body["alias"].as_str().unwrap().to_string(),
        project_id: body["project_id"].as_str().unwrap().to_string(),
    }
}

pub fn auth_header(api_key: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {api_key}"))
}
