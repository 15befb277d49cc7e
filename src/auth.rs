//! Identity-scoped auth gate (C3): API key hashing/verification and the
//! request guards that resolve a tenant + optionally an acting agent.
//!
//! Grounded on `auth.py`: SHA-256 over the plaintext key for storage/lookup,
//! constant-time comparison, Bearer-token parsing, and the proxy-header mode
//! (`X-BH-Auth` HMAC'd over `v2:{project_id}:{principal_type}:{principal_id}:{actor_id}`)
//! gated behind an explicit trust flag and secret.

use hmac::{Hmac, Mac};
use rocket::http::Status;
use rocket::outcome::Outcome;
use rocket::request::{self, FromRequest, Request};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::db::Db;
use crate::error::AwebError;

pub const INTERNAL_AUTH_HEADER: &str = "X-BH-Auth";
pub const INTERNAL_PROJECT_HEADER: &str = "X-Project-ID";
pub const INTERNAL_USER_HEADER: &str = "X-User-ID";
pub const INTERNAL_API_KEY_ID_HEADER: &str = "X-API-Key";
pub const INTERNAL_ACTOR_HEADER: &str = "X-Aweb-Actor-ID";

pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_api_key_hash(key: &str, key_hash: &str) -> bool {
    if key_hash.is_empty() {
        return false;
    }
    let computed = hash_api_key(key);
    computed.as_bytes().ct_eq(key_hash.as_bytes()).into()
}

fn parse_bearer_token(request: &Request<'_>) -> Result<Option<String>, AwebError> {
    let Some(header) = request.headers().get_one("Authorization") else {
        return Ok(None);
    };
    match header.strip_prefix("Bearer ") {
        Some(token) => Ok(Some(token.to_string())),
        None => Err(AwebError::AuthRequired),
    }
}

fn internal_auth_header_value(secret: &str, project_id: &str, principal_type: &str, principal_id: &str, actor_id: &str) -> String {
    let msg = format!("v2:{project_id}:{principal_type}:{principal_id}:{actor_id}");
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(msg.as_bytes());
    let sig = hex::encode(mac.finalize().into_bytes());
    format!("{msg}:{sig}")
}

struct ProxyAuthContext {
    project_id: String,
    actor_id: String,
}

fn parse_proxy_auth(request: &Request<'_>, secret: &str) -> Result<Option<ProxyAuthContext>, AwebError> {
    let Some(internal_auth) = request.headers().get_one(INTERNAL_AUTH_HEADER) else {
        return Ok(None);
    };

    let project_id = request
        .headers()
        .get_one(INTERNAL_PROJECT_HEADER)
        .ok_or(AwebError::AuthRequired)?
        .to_string();

    let (principal_type, principal_id) = if let Some(user_id) = request.headers().get_one(INTERNAL_USER_HEADER) {
        ("u", user_id.to_string())
    } else if let Some(key_id) = request.headers().get_one(INTERNAL_API_KEY_ID_HEADER) {
        ("k", key_id.to_string())
    } else {
        return Err(AwebError::AuthRequired);
    };

    let actor_id = request
        .headers()
        .get_one(INTERNAL_ACTOR_HEADER)
        .ok_or(AwebError::AuthRequired)?
        .to_string();

    let expected = internal_auth_header_value(secret, &project_id, principal_type, &principal_id, &actor_id);
    if !bool::from(internal_auth.as_bytes().ct_eq(expected.as_bytes())) {
        return Err(AwebError::AuthRequired);
    }

    Ok(Some(ProxyAuthContext { project_id, actor_id }))
}

/// The resolved tenant scope for a request, with the acting agent id when
/// the credential is bound to one (a project-level key is not).
pub struct AuthContext {
    pub project_id: String,
    pub agent_id: Option<String>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthContext {
    type Error = AwebError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let config = request.rocket().state::<Config>().expect("Config is managed state");
        let db = request.rocket().state::<Db>().expect("Db is managed state");

        if config.trust_proxy_headers {
            let secret = config
                .internal_auth_secret
                .as_deref()
                .expect("validated at startup: trust_proxy_headers requires a secret");
            return match parse_proxy_auth(request, secret) {
                Ok(Some(ctx)) => Outcome::Success(AuthContext {
                    project_id: ctx.project_id,
                    agent_id: Some(ctx.actor_id),
                }),
                Ok(None) => Outcome::Error((Status::Unauthorized, AwebError::AuthRequired)),
                Err(e) => Outcome::Error((Status::Unauthorized, e)),
            };
        }

        let token = match parse_bearer_token(request) {
            Ok(Some(token)) => token,
            Ok(None) => return Outcome::Error((Status::Unauthorized, AwebError::AuthRequired)),
            Err(e) => return Outcome::Error((Status::Unauthorized, e)),
        };

        let key_hash = hash_api_key(&token);
        let conn = db.conn.lock().unwrap();
        let row: Option<(String, Option<String>, bool)> = conn
            .query_row(
                "SELECT project_id, agent_id, is_active FROM api_keys WHERE key_hash = ?1",
                [&key_hash],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .ok();

        match row {
            Some((project_id, agent_id, true)) => {
                conn.execute(
                    "UPDATE api_keys SET last_used_at = ?1 WHERE key_hash = ?2",
                    rusqlite::params![chrono::Utc::now().to_rfc3339(), key_hash],
                )
                .ok();
                Outcome::Success(AuthContext { project_id, agent_id })
            }
            _ => Outcome::Error((Status::Unauthorized, AwebError::InvalidCredentials)),
        }
    }
}

impl AuthContext {
    pub fn require_agent(&self) -> Result<&str, AwebError> {
        self.agent_id
            .as_deref()
            .ok_or_else(|| AwebError::Forbidden("API key is not bound to an agent".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_verifies() {
        let hash = hash_api_key("aw_sk_abc");
        assert!(verify_api_key_hash("aw_sk_abc", &hash));
        assert!(!verify_api_key_hash("aw_sk_xyz", &hash));
    }

    #[test]
    fn proxy_header_signature_matches() {
        let secret = "s3cret";
        let expected = internal_auth_header_value(secret, "p1", "u", "u1", "a1");
        let (msg, sig) = expected.rsplit_once(':').unwrap();
        assert_eq!(msg, "v2:p1:u:u1:a1");
        assert_eq!(sig.len(), 64);
    }
}
