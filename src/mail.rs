//! Mail pipeline (C6): at-most-once delivery, alias-spoofing defense, and
//! per-sender rotation-announcement attachment on the read side.
//!
//! Grounded on `messages_service.py`'s `deliver_message`/`get_agent_row`
//! (canonical-alias check, project-scoped agent lookup) plus spec §4.6's
//! `Gone`-on-retired-recipient and rotation-announcement coverage rules.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;

use crate::error::AwebError;
use crate::identity::custody::sign_on_behalf;
use crate::identity::lifecycle::fetch_agent_by_id;
use crate::identity::rotation::{acknowledge_rotation, pending_announcement_for};
use crate::models::{AgentStatus, MailMessage, RotationAnnouncementView};

fn project_slug(conn: &Connection, project_id: &str) -> String {
    conn.query_row(
        "SELECT slug FROM tenants WHERE project_id = ?1",
        [project_id],
        |r| r.get(0),
    )
    .unwrap_or_default()
}

pub struct DeliverOutcome {
    pub message_id: String,
    pub created_at: String,
    pub from_did: Option<String>,
    pub to_did: Option<String>,
    pub signature: Option<String>,
    pub signing_key_id: Option<String>,
}

#[allow(clippy::too_many_arguments)]
pub fn deliver(
    conn: &Connection,
    master_key: Option<&[u8; 32]>,
    project_id: &str,
    from_agent_id: &str,
    from_alias: &str,
    to_agent_id: &str,
    subject: &str,
    body: &str,
    priority: &str,
    thread_id: Option<&str>,
    from_did: Option<&str>,
    to_did: Option<&str>,
    signature: Option<&str>,
    signing_key_id: Option<&str>,
) -> Result<DeliverOutcome, AwebError> {
    let sender = fetch_agent_by_id(conn, from_agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .ok_or_else(|| AwebError::NotFound("agent not found".to_string()))?;
    if sender.project_id != project_id {
        return Err(AwebError::NotFound("agent not found".to_string()));
    }
    if sender.alias != from_alias {
        return Err(AwebError::Validation("from_alias does not match canonical alias".to_string()));
    }

    let recipient = fetch_agent_by_id(conn, to_agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .ok_or_else(|| AwebError::NotFound("agent not found".to_string()))?;
    if recipient.project_id != project_id {
        return Err(AwebError::NotFound("agent not found".to_string()));
    }
    if recipient.status == AgentStatus::Retired {
        let successor_alias = recipient
            .successor_agent_id
            .as_deref()
            .and_then(|id| fetch_agent_by_id(conn, id).ok().flatten())
            .map(|a| a.alias);
        return Err(AwebError::Gone { successor_alias });
    }

    let message_id = uuid::Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();

    // Sign before INSERT so the message is never observable unsigned: the
    // signed message id is always the stored one.
    let (from_did, signature, signing_key_id) = if signature.is_none() {
        let slug = project_slug(conn, project_id);
        let fields = json!({
            "from": format!("{slug}/{from_alias}"),
            "from_did": "",
            "message_id": message_id,
            "to": format!("{slug}/{}", recipient.alias),
            "to_did": to_did.unwrap_or(""),
            "type": "mail",
            "subject": subject,
            "body": body,
            "timestamp": created_at,
        });
        let fields = fields.as_object().expect("json! object literal").clone();
        match sign_on_behalf(conn, master_key, from_agent_id, &fields)
            .map_err(|e| AwebError::Internal(format!("custodial signing failed: {e}")))?
        {
            Some((did, sig, key_id)) => (Some(did), Some(sig), Some(key_id)),
            None => (from_did.map(String::from), None, signing_key_id.map(String::from)),
        }
    } else {
        (from_did.map(String::from), signature.map(String::from), signing_key_id.map(String::from))
    };

    conn.execute(
        "INSERT INTO mail_messages \
         (message_id, project_id, from_agent_id, from_alias, to_agent_id, subject, body, \
          priority, thread_id, from_did, to_did, signature, signing_key_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            message_id, project_id, from_agent_id, from_alias, to_agent_id, subject, body,
            priority, thread_id, from_did, to_did, signature, signing_key_id, created_at,
        ],
    )
    .map_err(|e| AwebError::Internal(e.to_string()))?;

    // The recipient sending to the sender acks the sender's rotations; the
    // sender sending here acks the *recipient's* outstanding rotations.
    acknowledge_rotation(conn, from_agent_id, to_agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    Ok(DeliverOutcome {
        message_id,
        created_at,
        from_did,
        to_did: to_did.map(String::from),
        signature,
        signing_key_id,
    })
}

pub fn inbox(
    conn: &Connection,
    project_id: &str,
    actor_agent_id: &str,
    unread_only: bool,
    limit: i64,
) -> Result<Vec<MailMessage>, AwebError> {
    let query = if unread_only {
        "SELECT message_id, from_agent_id, from_alias, to_agent_id, subject, body, priority, \
                thread_id, created_at, read_at, from_did, to_did, signature, signing_key_id \
         FROM mail_messages \
         WHERE project_id = ?1 AND to_agent_id = ?2 AND read_at IS NULL \
         ORDER BY created_at DESC LIMIT ?3"
    } else {
        "SELECT message_id, from_agent_id, from_alias, to_agent_id, subject, body, priority, \
                thread_id, created_at, read_at, from_did, to_did, signature, signing_key_id \
         FROM mail_messages \
         WHERE project_id = ?1 AND to_agent_id = ?2 \
         ORDER BY created_at DESC LIMIT ?3"
    };

    let mut stmt = conn.prepare(query).map_err(|e| AwebError::Internal(e.to_string()))?;
    let rows = stmt
        .query_map(params![project_id, actor_agent_id, limit], |row| {
            Ok(MailMessage {
                message_id: row.get(0)?,
                from_agent_id: row.get(1)?,
                from_alias: row.get(2)?,
                to_agent_id: row.get(3)?,
                subject: row.get(4)?,
                body: row.get(5)?,
                priority: row.get(6)?,
                thread_id: row.get(7)?,
                created_at: row.get(8)?,
                read_at: row.get(9)?,
                rotation_announcement: None,
                from_did: row.get(10)?,
                to_did: row.get(11)?,
                signature: row.get(12)?,
                signing_key_id: row.get(13)?,
            })
        })
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    let mut messages = Vec::new();
    for row in rows {
        let mut message = row.map_err(|e| AwebError::Internal(e.to_string()))?;
        let announcement = pending_announcement_for(conn, &message.from_agent_id, actor_agent_id)
            .map_err(|e| AwebError::Internal(e.to_string()))?;
        message.rotation_announcement = announcement.map(|a| RotationAnnouncementView {
            old_did: a.old_did,
            new_did: a.new_did,
            timestamp: a.rotation_timestamp,
            old_key_signature: a.old_key_signature,
        });
        messages.push(message);
    }

    Ok(messages)
}

/// Marks a single message read by its recipient. Idempotent; `NotFound` if
/// the message doesn't exist or belongs to a different recipient/tenant.
pub fn acknowledge(
    conn: &Connection,
    project_id: &str,
    agent_id: &str,
    message_id: &str,
) -> Result<(), AwebError> {
    let updated = conn
        .execute(
            "UPDATE mail_messages SET read_at = ?1 \
             WHERE message_id = ?2 AND project_id = ?3 AND to_agent_id = ?4 AND read_at IS NULL",
            params![Utc::now().to_rfc3339(), message_id, project_id, agent_id],
        )
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    if updated == 0 {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM mail_messages WHERE message_id = ?1 AND project_id = ?2 AND to_agent_id = ?3",
                params![message_id, project_id, agent_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| AwebError::Internal(e.to_string()))?;
        if exists.is_none() {
            return Err(AwebError::NotFound("message not found".to_string()));
        }
    }

    Ok(())
}
