//! Rotation announcement storage, per-peer injection, and acknowledgment.
//!
//! Grounded on `rotation_announcements.py`: after a key rotation, the first
//! message to each peer carries a rotation_announcement so receivers accept
//! the new DID instead of flagging IDENTITY_MISMATCH. An announcement stays
//! pending for a peer until that peer acknowledges it (by sending anything
//! back to the rotated agent) or 24 hours pass, whichever comes first.

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

const ANNOUNCEMENT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize)]
pub struct RotationAnnouncement {
    pub announcement_id: String,
    pub old_did: String,
    pub new_did: String,
    pub rotation_timestamp: String,
    pub old_key_signature: Option<String>,
}

pub fn record_rotation(
    conn: &Connection,
    agent_id: &str,
    old_did: &str,
    new_did: &str,
    old_key_signature: Option<&str>,
) -> rusqlite::Result<String> {
    let announcement_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO rotation_announcements \
         (announcement_id, agent_id, old_did, new_did, rotation_timestamp, old_key_signature, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![announcement_id, agent_id, old_did, new_did, now, old_key_signature, now],
    )?;
    Ok(announcement_id)
}

/// The pending rotation announcement (if any) that `recipient_id` has not yet
/// acknowledged from `sender_id`, scoped to the last 24 hours.
pub fn pending_announcement_for(
    conn: &Connection,
    sender_id: &str,
    recipient_id: &str,
) -> rusqlite::Result<Option<RotationAnnouncement>> {
    let cutoff = (Utc::now() - Duration::hours(ANNOUNCEMENT_WINDOW_HOURS)).to_rfc3339();
    conn.query_row(
        "SELECT ra.announcement_id, ra.old_did, ra.new_did, ra.rotation_timestamp, ra.old_key_signature \
         FROM rotation_announcements ra \
         WHERE ra.agent_id = ?1 AND ra.created_at > ?2 \
           AND NOT EXISTS ( \
               SELECT 1 FROM rotation_peer_acks rpa \
               WHERE rpa.announcement_id = ra.announcement_id \
                 AND rpa.peer_agent_id = ?3 \
                 AND rpa.acknowledged_at IS NOT NULL \
           ) \
         ORDER BY ra.created_at ASC LIMIT 1",
        params![sender_id, cutoff, recipient_id],
        |row| {
            Ok(RotationAnnouncement {
                announcement_id: row.get(0)?,
                old_did: row.get(1)?,
                new_did: row.get(2)?,
                rotation_timestamp: row.get(3)?,
                old_key_signature: row.get(4)?,
            })
        },
    )
    .optional()
}

/// Mark every outstanding announcement from `to_agent_id` as acknowledged by
/// `from_agent_id`, called whenever `from_agent_id` addresses `to_agent_id`
/// directly (the peer may never have polled its inbox).
pub fn acknowledge_rotation(
    conn: &Connection,
    from_agent_id: &str,
    to_agent_id: &str,
) -> rusqlite::Result<()> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT announcement_id FROM rotation_announcements WHERE agent_id = ?1",
    )?;
    let ids: Vec<String> = stmt
        .query_map([to_agent_id], |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    for announcement_id in ids {
        conn.execute(
            "INSERT INTO rotation_peer_acks (announcement_id, peer_agent_id, acknowledged_at) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(announcement_id, peer_agent_id) DO UPDATE SET \
                acknowledged_at = COALESCE(rotation_peer_acks.acknowledged_at, excluded.acknowledged_at)",
            params![announcement_id, from_agent_id, now],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    fn conn_with_schema() -> Db {
        Db::in_memory()
    }

    #[test]
    fn pending_announcement_cleared_after_ack() {
        let db = conn_with_schema();
        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tenants (project_id, slug, name, created_at) VALUES ('p','p','p', '2026-01-01')",
            [],
        )
        .unwrap();
        for (id, alias) in [("a1", "alice"), ("a2", "bob")] {
            conn.execute(
                "INSERT INTO agents (agent_id, project_id, alias, kind, access_policy, custody, lifetime, status, created_at) \
                 VALUES (?1, 'p', ?2, 'agent', 'open', 'self_custody', 'persistent', 'active', '2026-01-01')",
                params![id, alias],
            )
            .unwrap();
        }
        record_rotation(&conn, "a1", "did:key:zold", "did:key:znew", None).unwrap();

        let pending = pending_announcement_for(&conn, "a1", "a2").unwrap();
        assert!(pending.is_some());

        acknowledge_rotation(&conn, "a2", "a1").unwrap();
        let pending_after = pending_announcement_for(&conn, "a1", "a2").unwrap();
        assert!(pending_after.is_none());
    }
}
