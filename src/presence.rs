//! Presence & Waiting Index (C4): ephemeral, in-process indexes of which
//! agents are online and which have an active SSE stream on a chat session.
//!
//! Grounded on `presence.py`/`chat_waiting.py` (Redis-backed TTL indexes in
//! the original) and the teacher's `PresenceTracker` (`routes/mod.rs`) for
//! the in-process `Arc<RwLock<HashMap<..>>>` shape. Per SPEC_FULL §10's
//! resolution, this crate holds no external KV store: loss of this index is
//! exactly as harmless here as loss of Redis is in the original — the
//! agents table stays authoritative for identity, this is only a live view.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::models::PresenceEntry;

pub const DEFAULT_PRESENCE_TTL_SECONDS: u64 = 1800;
pub const WAITING_TTL_SECONDS: u64 = 90;

struct PresenceRecord {
    alias: String,
    status: String,
    last_seen: String,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct PresenceIndex {
    inner: Arc<RwLock<HashMap<String, HashMap<String, PresenceRecord>>>>,
}

impl Default for PresenceIndex {
    fn default() -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())) }
    }
}

impl PresenceIndex {
    pub fn update(&self, project_id: &str, agent_id: &str, alias: &str, status: &str, ttl_seconds: u64) -> String {
        let now = chrono::Utc::now().to_rfc3339();
        let mut map = self.inner.write().unwrap();
        let project = map.entry(project_id.to_string()).or_default();
        project.insert(
            agent_id.to_string(),
            PresenceRecord {
                alias: alias.to_string(),
                status: status.to_string(),
                last_seen: now.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
            },
        );
        now
    }

    pub fn list_for_project(&self, project_id: &str) -> Vec<PresenceEntry> {
        let mut map = self.inner.write().unwrap();
        let Some(project) = map.get_mut(project_id) else {
            return Vec::new();
        };
        let now = Instant::now();
        project.retain(|_, record| record.expires_at > now);
        project
            .iter()
            .map(|(agent_id, record)| PresenceEntry {
                agent_id: agent_id.clone(),
                alias: record.alias.clone(),
                status: record.status.clone(),
                last_seen: record.last_seen.clone(),
            })
            .collect()
    }

    pub fn clear(&self, project_id: &str, agent_id: &str) {
        if let Some(project) = self.inner.write().unwrap().get_mut(project_id) {
            project.remove(agent_id);
        }
    }
}

struct WaitingRecord {
    expires_at: Instant,
}

#[derive(Clone)]
pub struct WaitingIndex {
    inner: Arc<RwLock<HashMap<String, HashMap<String, WaitingRecord>>>>,
}

impl Default for WaitingIndex {
    fn default() -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())) }
    }
}

impl WaitingIndex {
    pub fn register(&self, session_id: &str, agent_id: &str) {
        let mut map = self.inner.write().unwrap();
        let session = map.entry(session_id.to_string()).or_default();
        session.insert(
            agent_id.to_string(),
            WaitingRecord { expires_at: Instant::now() + Duration::from_secs(WAITING_TTL_SECONDS) },
        );
    }

    pub fn unregister(&self, session_id: &str, agent_id: &str) {
        if let Some(session) = self.inner.write().unwrap().get_mut(session_id) {
            session.remove(agent_id);
        }
    }

    pub fn is_waiting(&self, session_id: &str, agent_id: &str) -> bool {
        let mut map = self.inner.write().unwrap();
        let Some(session) = map.get_mut(session_id) else {
            return false;
        };
        match session.get(agent_id) {
            Some(record) if record.expires_at > Instant::now() => true,
            Some(_) => {
                session.remove(agent_id);
                false
            }
            None => false,
        }
    }
}
