//! Reservation manager (C8): TTL-bounded advisory locks on arbitrary
//! resource keys, scoped per tenant.
//!
//! Grounded on `reservations_service.py`. SQLite has no row-level
//! `SELECT ... FOR UPDATE`; the original's per-resource serialization is
//! reproduced here with `BEGIN IMMEDIATE`, which takes the write lock for the
//! whole connection for the duration of the transaction (spec §4.8, §5).

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::AwebError;
use crate::identity::lifecycle::fetch_agent_by_id;
use crate::models::Reservation;

pub const MIN_TTL_SECONDS: i64 = 60;
pub const MAX_TTL_SECONDS: i64 = 3600;

pub fn clamp_ttl(ttl_seconds: i64) -> i64 {
    ttl_seconds.clamp(MIN_TTL_SECONDS, MAX_TTL_SECONDS)
}

pub enum AcquireOutcome {
    Acquired(Reservation),
    Conflict { holder_agent_id: String, holder_alias: String, expires_at: String },
}

pub fn acquire(
    conn: &Connection,
    project_id: &str,
    agent_id: &str,
    resource_key: &str,
    ttl_seconds: i64,
    metadata: serde_json::Value,
) -> Result<AcquireOutcome, AwebError> {
    let agent = fetch_agent_by_id(conn, agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .filter(|a| a.project_id == project_id)
        .ok_or_else(|| AwebError::NotFound("agent not found".to_string()))?;

    let ttl = clamp_ttl(ttl_seconds);
    let now = Utc::now();
    let expires_at = now + Duration::seconds(ttl);

    conn.execute_batch("BEGIN IMMEDIATE").map_err(|e| AwebError::Internal(e.to_string()))?;
    let result = acquire_locked(conn, project_id, &agent.agent_id, &agent.alias, resource_key, now, expires_at, &metadata);
    match &result {
        Ok(_) => conn.execute_batch("COMMIT").map_err(|e| AwebError::Internal(e.to_string()))?,
        Err(_) => conn.execute_batch("ROLLBACK").ok().unwrap_or(()),
    }
    result
}

fn acquire_locked(
    conn: &Connection,
    project_id: &str,
    agent_id: &str,
    alias: &str,
    resource_key: &str,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    metadata: &serde_json::Value,
) -> Result<AcquireOutcome, AwebError> {
    let existing: Option<(String, String, String)> = conn
        .query_row(
            "SELECT holder_agent_id, holder_alias, expires_at FROM reservations \
             WHERE project_id = ?1 AND resource_key = ?2",
            params![project_id, resource_key],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    if let Some((holder_agent_id, holder_alias, expires_at_str)) = &existing {
        let held_until: DateTime<Utc> = expires_at_str
            .parse()
            .map_err(|_| AwebError::Internal("corrupt reservation expiry".to_string()))?;
        if held_until > now {
            return Ok(AcquireOutcome::Conflict {
                holder_agent_id: holder_agent_id.clone(),
                holder_alias: holder_alias.clone(),
                expires_at: expires_at_str.clone(),
            });
        }
        conn.execute(
            "DELETE FROM reservations WHERE project_id = ?1 AND resource_key = ?2",
            params![project_id, resource_key],
        )
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    }

    conn.execute(
        "INSERT INTO reservations \
         (project_id, resource_key, holder_agent_id, holder_alias, acquired_at, expires_at, metadata) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            project_id, resource_key, agent_id, alias,
            now.to_rfc3339(), expires_at.to_rfc3339(), metadata.to_string(),
        ],
    )
    .map_err(|e| AwebError::Internal(e.to_string()))?;

    Ok(AcquireOutcome::Acquired(Reservation {
        project_id: project_id.to_string(),
        resource_key: resource_key.to_string(),
        holder_agent_id: agent_id.to_string(),
        holder_alias: alias.to_string(),
        acquired_at: now.to_rfc3339(),
        expires_at: expires_at.to_rfc3339(),
        metadata: metadata.clone(),
    }))
}

pub enum RenewOutcome {
    Renewed { expires_at: String },
    NotFound,
    NotOwner,
}

pub fn renew(conn: &Connection, project_id: &str, agent_id: &str, resource_key: &str, ttl_seconds: i64) -> Result<RenewOutcome, AwebError> {
    let now = Utc::now();
    let ttl = clamp_ttl(ttl_seconds);
    conn.execute_batch("BEGIN IMMEDIATE").map_err(|e| AwebError::Internal(e.to_string()))?;
    let result = renew_locked(conn, project_id, agent_id, resource_key, now, ttl);
    match &result {
        Ok(_) => conn.execute_batch("COMMIT").map_err(|e| AwebError::Internal(e.to_string()))?,
        Err(_) => conn.execute_batch("ROLLBACK").ok().unwrap_or(()),
    }
    result
}

fn renew_locked(conn: &Connection, project_id: &str, agent_id: &str, resource_key: &str, now: DateTime<Utc>, ttl: i64) -> Result<RenewOutcome, AwebError> {
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT holder_agent_id, expires_at FROM reservations WHERE project_id = ?1 AND resource_key = ?2",
            params![project_id, resource_key],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    let Some((holder_agent_id, expires_at_str)) = existing else {
        return Ok(RenewOutcome::NotFound);
    };
    let held_until: DateTime<Utc> = expires_at_str
        .parse()
        .map_err(|_| AwebError::Internal("corrupt reservation expiry".to_string()))?;
    if held_until <= now {
        return Ok(RenewOutcome::NotFound);
    }
    if holder_agent_id != agent_id {
        return Ok(RenewOutcome::NotOwner);
    }

    let new_expires_at = now + Duration::seconds(ttl);
    conn.execute(
        "UPDATE reservations SET expires_at = ?1 WHERE project_id = ?2 AND resource_key = ?3",
        params![new_expires_at.to_rfc3339(), project_id, resource_key],
    )
    .map_err(|e| AwebError::Internal(e.to_string()))?;

    Ok(RenewOutcome::Renewed { expires_at: new_expires_at.to_rfc3339() })
}

/// Admin operation: delete all (optionally prefix-matched) reservations in a
/// tenant regardless of holder; returns the number deleted.
pub fn revoke(conn: &Connection, project_id: &str, prefix: Option<&str>) -> Result<usize, AwebError> {
    if let Some(prefix) = prefix {
        conn.execute(
            "DELETE FROM reservations WHERE project_id = ?1 AND resource_key LIKE ?2",
            params![project_id, format!("{prefix}%")],
        )
    } else {
        conn.execute("DELETE FROM reservations WHERE project_id = ?1", params![project_id])
    }
    .map_err(|e| AwebError::Internal(e.to_string()))
}

pub enum ReleaseOutcome {
    Released { deleted: bool },
    Conflict,
}

/// Missing/expired reservations release idempotently; a live reservation
/// held by a different agent is a conflict. Does not validate `agent_id`
/// exists — callers are authenticated already.
pub fn release(conn: &Connection, project_id: &str, agent_id: &str, resource_key: &str) -> Result<ReleaseOutcome, AwebError> {
    let now = Utc::now();
    conn.execute_batch("BEGIN IMMEDIATE").map_err(|e| AwebError::Internal(e.to_string()))?;
    let result = release_locked(conn, project_id, agent_id, resource_key, now);
    match &result {
        Ok(_) => conn.execute_batch("COMMIT").map_err(|e| AwebError::Internal(e.to_string()))?,
        Err(_) => conn.execute_batch("ROLLBACK").ok().unwrap_or(()),
    }
    result
}

fn release_locked(conn: &Connection, project_id: &str, agent_id: &str, resource_key: &str, now: DateTime<Utc>) -> Result<ReleaseOutcome, AwebError> {
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT holder_agent_id, expires_at FROM reservations WHERE project_id = ?1 AND resource_key = ?2",
            params![project_id, resource_key],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    let Some((holder_agent_id, expires_at_str)) = existing else {
        return Ok(ReleaseOutcome::Released { deleted: false });
    };
    let held_until: DateTime<Utc> = expires_at_str
        .parse()
        .map_err(|_| AwebError::Internal("corrupt reservation expiry".to_string()))?;
    if held_until <= now {
        return Ok(ReleaseOutcome::Released { deleted: false });
    }
    if holder_agent_id != agent_id {
        return Ok(ReleaseOutcome::Conflict);
    }

    conn.execute(
        "DELETE FROM reservations WHERE project_id = ?1 AND resource_key = ?2",
        params![project_id, resource_key],
    )
    .map_err(|e| AwebError::Internal(e.to_string()))?;

    Ok(ReleaseOutcome::Released { deleted: true })
}

pub fn list(conn: &Connection, project_id: &str, prefix: Option<&str>) -> Result<Vec<Reservation>, AwebError> {
    let now = Utc::now().to_rfc3339();
    let query = if prefix.is_some() {
        "SELECT project_id, resource_key, holder_agent_id, holder_alias, acquired_at, expires_at, metadata \
         FROM reservations WHERE project_id = ?1 AND expires_at > ?2 AND resource_key LIKE ?3 \
         ORDER BY resource_key ASC"
    } else {
        "SELECT project_id, resource_key, holder_agent_id, holder_alias, acquired_at, expires_at, metadata \
         FROM reservations WHERE project_id = ?1 AND expires_at > ?2 \
         ORDER BY resource_key ASC"
    };
    let like_pattern = prefix.map(|p| format!("{p}%")).unwrap_or_default();

    let mut stmt = conn.prepare(query).map_err(|e| AwebError::Internal(e.to_string()))?;
    let rows = stmt
        .query_map(params![project_id, now, like_pattern], |row| {
            let metadata_str: String = row.get(6)?;
            Ok(Reservation {
                project_id: row.get(0)?,
                resource_key: row.get(1)?,
                holder_agent_id: row.get(2)?,
                holder_alias: row.get(3)?,
                acquired_at: row.get(4)?,
                expires_at: row.get(5)?,
                metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
            })
        })
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    rows.collect::<Result<_, _>>().map_err(|e| AwebError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::identity::lifecycle::{bootstrap_identity, ensure_tenant};
    use crate::models::AgentKind;

    #[test]
    fn acquire_then_conflict_then_release() {
        let db = Db::in_memory();
        let conn = db.conn.lock().unwrap();
        let tenant = ensure_tenant(&conn, "acme", "Acme").unwrap();
        let alice = bootstrap_identity(&conn, &tenant.project_id, Some("alice"), "", AgentKind::Agent, None, None).unwrap();
        let bob = bootstrap_identity(&conn, &tenant.project_id, Some("bob"), "", AgentKind::Agent, None, None).unwrap();

        let first = acquire(&conn, &tenant.project_id, &alice.agent.agent_id, "gpu-0", 300, serde_json::json!({})).unwrap();
        assert!(matches!(first, AcquireOutcome::Acquired(_)));

        let second = acquire(&conn, &tenant.project_id, &bob.agent.agent_id, "gpu-0", 300, serde_json::json!({})).unwrap();
        assert!(matches!(second, AcquireOutcome::Conflict { .. }));

        let release_by_wrong_holder = release(&conn, &tenant.project_id, &bob.agent.agent_id, "gpu-0").unwrap();
        assert!(matches!(release_by_wrong_holder, ReleaseOutcome::Conflict));

        let release_by_holder = release(&conn, &tenant.project_id, &alice.agent.agent_id, "gpu-0").unwrap();
        assert!(matches!(release_by_holder, ReleaseOutcome::Released { deleted: true }));
    }

    #[test]
    fn ttl_is_clamped() {
        assert_eq!(clamp_ttl(1), MIN_TTL_SECONDS);
        assert_eq!(clamp_ttl(999_999), MAX_TTL_SECONDS);
        assert_eq!(clamp_ttl(300), 300);
    }

    #[test]
    fn renew_requires_ownership_then_extends() {
        let db = Db::in_memory();
        let conn = db.conn.lock().unwrap();
        let tenant = ensure_tenant(&conn, "acme", "Acme").unwrap();
        let alice = bootstrap_identity(&conn, &tenant.project_id, Some("alice"), "", AgentKind::Agent, None, None).unwrap();
        let bob = bootstrap_identity(&conn, &tenant.project_id, Some("bob"), "", AgentKind::Agent, None, None).unwrap();

        acquire(&conn, &tenant.project_id, &alice.agent.agent_id, "gpu-0", 300, serde_json::json!({})).unwrap();

        let not_owner = renew(&conn, &tenant.project_id, &bob.agent.agent_id, "gpu-0", 300).unwrap();
        assert!(matches!(not_owner, RenewOutcome::NotOwner));

        let renewed = renew(&conn, &tenant.project_id, &alice.agent.agent_id, "gpu-0", 300).unwrap();
        assert!(matches!(renewed, RenewOutcome::Renewed { .. }));
    }

    #[test]
    fn revoke_deletes_prefix_matched_reservations() {
        let db = Db::in_memory();
        let conn = db.conn.lock().unwrap();
        let tenant = ensure_tenant(&conn, "acme", "Acme").unwrap();
        let alice = bootstrap_identity(&conn, &tenant.project_id, Some("alice"), "", AgentKind::Agent, None, None).unwrap();
        acquire(&conn, &tenant.project_id, &alice.agent.agent_id, "gpu-0", 300, serde_json::json!({})).unwrap();
        acquire(&conn, &tenant.project_id, &alice.agent.agent_id, "disk-0", 300, serde_json::json!({})).unwrap();

        let deleted = revoke(&conn, &tenant.project_id, Some("gpu-")).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(list(&conn, &tenant.project_id, None).unwrap().len(), 1);
    }
}
