//! Process-wide configuration, loaded once from the environment at startup.
//!
//! Mirrors `rate_limit::RateLimitConfig::from_env()`'s style: plain `env::var`
//! reads with typed fallbacks, no external config-file format.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub custody_master_key: Option<[u8; 32]>,
    pub trust_proxy_headers: bool,
    pub internal_auth_secret: Option<String>,
    pub server_url: Option<String>,
    pub presence_ttl_seconds: u64,
    pub mutation_hook_url: Option<String>,
    pub mutation_hook_secret: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "AWEB_TRUST_PROXY_HEADERS is enabled but no internal auth secret is configured. \
         Set AWEB_INTERNAL_AUTH_SECRET or BEADHUB_INTERNAL_AUTH_SECRET."
    )]
    ProxyHeadersWithoutSecret,
    #[error("AWEB_CUSTODY_KEY must be 64 hex characters (32 bytes): {0}")]
    InvalidCustodyKey(String),
}

fn truthy(val: &str) -> bool {
    matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| "data/aweb.db".to_string());

        let custody_master_key = match env::var("AWEB_CUSTODY_KEY") {
            Ok(hex_key) if !hex_key.trim().is_empty() => {
                let bytes = hex::decode(hex_key.trim())
                    .map_err(|e| ConfigError::InvalidCustodyKey(e.to_string()))?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| ConfigError::InvalidCustodyKey("wrong length".to_string()))?;
                Some(arr)
            }
            _ => None,
        };

        let trust_proxy_headers = env::var("AWEB_TRUST_PROXY_HEADERS")
            .map(|v| truthy(&v))
            .unwrap_or(false);

        let internal_auth_secret = env::var("AWEB_INTERNAL_AUTH_SECRET")
            .ok()
            .or_else(|| env::var("BEADHUB_INTERNAL_AUTH_SECRET").ok());

        if trust_proxy_headers && internal_auth_secret.is_none() {
            return Err(ConfigError::ProxyHeadersWithoutSecret);
        }

        let server_url = env::var("AWEB_SERVER_URL").ok();

        let presence_ttl_seconds = env::var("AWEB_PRESENCE_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1800);

        let mutation_hook_url = env::var("AWEB_MUTATION_HOOK_URL").ok();
        let mutation_hook_secret = env::var("AWEB_MUTATION_HOOK_SECRET").ok();

        Ok(Config {
            database_path,
            custody_master_key,
            trust_proxy_headers,
            internal_auth_secret,
            server_url,
            presence_ttl_seconds,
            mutation_hook_url,
            mutation_hook_secret,
        })
    }
}
