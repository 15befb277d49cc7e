//! Mutation hooks (C10): a single optional webhook URL configured at process
//! scope, fired best-effort for every mutating event.
//!
//! Grounded on the teacher's `webhooks.rs` dispatcher (subscribe to the
//! event bus, HMAC-sign the body, fire-and-forget with `tokio::spawn`) and
//! `hooks.py::fire_mutation_hook`'s contract: there is one callback, it is
//! awaited in-request but any failure is only logged, never propagated, and
//! per spec §4.10 there is no retry, no ordering guarantee, no durable
//! outbox. The original's per-room DB-configured webhook table is replaced
//! by a single process-wide URL (SPEC_FULL §10's resolution of the
//! webhook-transport Open Question).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::broadcast;

use crate::events::AwebEvent;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct HookConfig {
    pub url: Option<String>,
    pub secret: Option<String>,
}

/// Spawns a background task that subscribes to the event bus and POSTs each
/// event to the configured webhook URL. A no-op if no URL is configured.
pub fn spawn_dispatcher(mut receiver: broadcast::Receiver<AwebEvent>, config: HookConfig) {
    let Some(url) = config.url.clone() else {
        return;
    };

    tokio::spawn(async move {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");

        loop {
            match receiver.recv().await {
                Ok(event) if is_hook_event(&event) => deliver(&client, &url, config.secret.as_deref(), &event).await,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "mutation hook dispatcher lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// The spec's closed set of 7 hook events; `chat.read_receipt` and any future
/// bus-only event are not part of the mutation hook contract.
fn is_hook_event(event: &AwebEvent) -> bool {
    matches!(
        event,
        AwebEvent::AgentCreated { .. }
            | AwebEvent::AgentDeregistered { .. }
            | AwebEvent::MessageSent { .. }
            | AwebEvent::MessageAcknowledged { .. }
            | AwebEvent::ChatMessageSent { .. }
            | AwebEvent::ReservationAcquired { .. }
            | AwebEvent::ReservationReleased { .. }
    )
}

async fn deliver(client: &reqwest::Client, url: &str, secret: Option<&str>, event: &AwebEvent) {
    let body = match serde_json::to_string(event) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize mutation hook event");
            return;
        }
    };

    let mut request = client.post(url).header("Content-Type", "application/json");

    if let Some(secret) = secret {
        if let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) {
            mac.update(body.as_bytes());
            let signature = hex::encode(mac.finalize().into_bytes());
            request = request.header("X-Aweb-Signature", format!("sha256={signature}"));
        }
    }

    match request.body(body).send().await {
        Ok(resp) if !resp.status().is_success() => {
            tracing::warn!(status = %resp.status(), "mutation hook delivery rejected");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "mutation hook delivery failed"),
    }
}
