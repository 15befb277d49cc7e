//! Contact gate (C9): per-tenant contact lists and the access-control check
//! gating cross-tenant mail/chat initiation when an agent's access policy is
//! `contacts_only`.
//!
//! Grounded on `contacts.py::check_access` and `contacts_service.py`
//! (add/list/remove), adapted from the originals' org-slug federation model:
//! addresses are `tenant_slug/alias` and a contact entry may match either the
//! exact address or just the tenant slug (an org-level allow-all).

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::AwebError;
use crate::models::Contact;

fn org_slug(address: &str) -> &str {
    address.split('/').next().unwrap_or(address)
}

/// `sender_address` is allowed to reach `target_agent_id` in `target_project_id` when:
/// the target's access policy is `open`, OR the sender's tenant slug matches the
/// target's own tenant slug, OR the sender's address (or its org slug) is listed
/// as a contact of the target tenant.
pub fn check_access(
    conn: &Connection,
    target_project_id: &str,
    target_agent_id: &str,
    sender_address: &str,
) -> Result<bool, AwebError> {
    let access_policy: Option<String> = conn
        .query_row(
            "SELECT access_policy FROM agents WHERE agent_id = ?1 AND project_id = ?2 AND deleted_at IS NULL",
            params![target_agent_id, target_project_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    let Some(access_policy) = access_policy else {
        return Ok(false);
    };
    if access_policy != "contacts_only" {
        return Ok(true);
    }

    let slug = org_slug(sender_address);

    let same_tenant: Option<String> = conn
        .query_row(
            "SELECT t2.project_id FROM tenants t1 JOIN tenants t2 ON t2.slug = ?1 \
             WHERE t1.project_id = ?2 AND t1.deleted_at IS NULL AND t2.deleted_at IS NULL",
            params![slug, target_project_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    if same_tenant.as_deref() == Some(target_project_id) {
        return Ok(true);
    }

    let contact: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM contacts WHERE project_id = ?1 AND address IN (?2, ?3)",
            params![target_project_id, sender_address, slug],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    Ok(contact.is_some())
}

pub fn add_contact(conn: &Connection, project_id: &str, address: &str, label: Option<&str>) -> Result<Contact, AwebError> {
    let address = address.trim();
    if address.is_empty()
        || !address.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '.' | '-'))
    {
        return Err(AwebError::Validation("invalid contact address format".to_string()));
    }

    let slug: Option<String> = conn
        .query_row(
            "SELECT slug FROM tenants WHERE project_id = ?1 AND deleted_at IS NULL",
            [project_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    let slug = slug.ok_or_else(|| AwebError::NotFound("tenant not found".to_string()))?;

    if address == slug || address.starts_with(&format!("{slug}/")) {
        return Err(AwebError::BadRequest("cannot add self as contact".to_string()));
    }

    let contact_id = uuid::Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    let inserted = conn
        .execute(
            "INSERT INTO contacts (contact_id, project_id, address, label, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(project_id, address) DO NOTHING",
            params![contact_id, project_id, address, label, created_at],
        )
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    if inserted == 0 {
        return Err(AwebError::Conflict("contact already exists".to_string()));
    }

    Ok(Contact { contact_id, address: address.to_string(), label: label.map(String::from), created_at })
}

pub fn list_contacts(conn: &Connection, project_id: &str) -> Result<Vec<Contact>, AwebError> {
    let mut stmt = conn
        .prepare("SELECT contact_id, address, label, created_at FROM contacts WHERE project_id = ?1 ORDER BY address")
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    let rows = stmt
        .query_map([project_id], |row| {
            Ok(Contact {
                contact_id: row.get(0)?,
                address: row.get(1)?,
                label: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    rows.collect::<Result<_, _>>().map_err(|e| AwebError::Internal(e.to_string()))
}

pub fn remove_contact(conn: &Connection, project_id: &str, contact_id: &str) -> Result<(), AwebError> {
    conn.execute(
        "DELETE FROM contacts WHERE contact_id = ?1 AND project_id = ?2",
        params![contact_id, project_id],
    )
    .map_err(|e| AwebError::Internal(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[test]
    fn add_contact_rejects_self_reference() {
        let db = Db::in_memory();
        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tenants (project_id, slug, name, created_at) VALUES ('p1', 'acme', 'Acme', '2026-01-01')",
            [],
        )
        .unwrap();
        let err = add_contact(&conn, "p1", "acme/alice", None).unwrap_err();
        assert!(matches!(err, AwebError::BadRequest(_)));
    }

    #[test]
    fn add_contact_rejects_duplicates() {
        let db = Db::in_memory();
        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tenants (project_id, slug, name, created_at) VALUES ('p1', 'acme', 'Acme', '2026-01-01')",
            [],
        )
        .unwrap();
        add_contact(&conn, "p1", "other/bob", None).unwrap();
        let err = add_contact(&conn, "p1", "other/bob", None).unwrap_err();
        assert!(matches!(err, AwebError::Conflict(_)));
    }
}
