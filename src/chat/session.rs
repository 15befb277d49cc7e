//! Session lookup/creation, message send, history, and read receipts.
//!
//! Grounded on `chat_service.py`: `participant_hash` is SHA-256 over the
//! sorted, deduplicated participant agent ids; `ensure_session` finds-or-
//! creates by `(project_id, participant_hash)`; read receipts only advance
//! when the new cursor's message is strictly newer than the stored one
//! (monotonic non-regression), compared by message creation time rather
//! than wall-clock `last_read_at`.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::error::AwebError;
use crate::identity::custody::sign_on_behalf;
use crate::models::{ChatMessage, PendingConversation};
use crate::presence::WaitingIndex;

fn project_slug_for_session(conn: &Connection, session_id: &str) -> String {
    conn.query_row(
        "SELECT t.slug FROM tenants t \
         JOIN chat_sessions s ON s.project_id = t.project_id \
         WHERE s.session_id = ?1",
        [session_id],
        |r| r.get(0),
    )
    .unwrap_or_default()
}

pub fn participant_hash(agent_ids: &[String]) -> String {
    let normalized: BTreeSet<String> = agent_ids.iter().cloned().collect();
    let joined = normalized.into_iter().collect::<Vec<_>>().join(",");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct Participant {
    pub agent_id: String,
    pub alias: String,
}

/// Find-or-create a chat session for exactly this participant set.
pub fn ensure_session(
    conn: &Connection,
    project_id: &str,
    participants: &[Participant],
) -> Result<String, AwebError> {
    let ids: Vec<String> = participants.iter().map(|p| p.agent_id.clone()).collect();
    let hash = participant_hash(&ids);

    let existing: Option<String> = conn
        .query_row(
            "SELECT session_id FROM chat_sessions WHERE project_id = ?1 AND participant_hash = ?2",
            params![project_id, hash],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    let session_id = match existing {
        Some(id) => id,
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO chat_sessions (session_id, project_id, participant_hash, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, project_id, hash, Utc::now().to_rfc3339()],
            )
            .map_err(|e| AwebError::Internal(e.to_string()))?;
            id
        }
    };

    for participant in participants {
        conn.execute(
            "INSERT INTO chat_session_participants (session_id, agent_id, alias) VALUES (?1, ?2, ?3) \
             ON CONFLICT(session_id, agent_id) DO UPDATE SET alias = excluded.alias",
            params![session_id, participant.agent_id, participant.alias],
        )
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    }

    Ok(session_id)
}

pub fn is_participant(conn: &Connection, session_id: &str, agent_id: &str) -> Result<bool, AwebError> {
    conn.query_row(
        "SELECT 1 FROM chat_session_participants WHERE session_id = ?1 AND agent_id = ?2",
        params![session_id, agent_id],
        |_| Ok(()),
    )
    .optional()
    .map(|o| o.is_some())
    .map_err(|e| AwebError::Internal(e.to_string()))
}

pub struct SendOutcome {
    pub message_id: String,
    pub created_at: String,
    pub from_alias: String,
    pub from_did: Option<String>,
    pub to_did: Option<String>,
    pub signature: Option<String>,
    pub signing_key_id: Option<String>,
}

#[allow(clippy::too_many_arguments)]
pub fn send(
    conn: &Connection,
    master_key: Option<&[u8; 32]>,
    session_id: &str,
    agent_id: &str,
    body: &str,
    leaving: bool,
    hang_on: bool,
    from_did: Option<&str>,
    to_did: Option<&str>,
    signature: Option<&str>,
    signing_key_id: Option<&str>,
) -> Result<SendOutcome, AwebError> {
    let alias: Option<String> = conn
        .query_row(
            "SELECT alias FROM chat_session_participants WHERE session_id = ?1 AND agent_id = ?2",
            params![session_id, agent_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    let from_alias = alias.ok_or_else(|| AwebError::Forbidden("not a participant in this session".to_string()))?;

    let message_id = uuid::Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();

    let (from_did, signature, signing_key_id) = if signature.is_none() {
        let slug = project_slug_for_session(conn, session_id);
        let mut other_aliases: Vec<String> = conn
            .prepare("SELECT alias FROM chat_session_participants WHERE session_id = ?1 AND agent_id <> ?2")
            .map_err(|e| AwebError::Internal(e.to_string()))?
            .query_map(params![session_id, agent_id], |r| r.get::<_, String>(0))
            .map_err(|e| AwebError::Internal(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| AwebError::Internal(e.to_string()))?;
        other_aliases.sort();

        let fields = json!({
            "from": format!("{slug}/{from_alias}"),
            "from_did": "",
            "message_id": message_id,
            "to": other_aliases.iter().map(|a| format!("{slug}/{a}")).collect::<Vec<_>>().join(","),
            "to_did": to_did.unwrap_or(""),
            "type": "chat",
            "subject": "",
            "body": body,
            "timestamp": created_at,
        });
        let fields = fields.as_object().expect("json! object literal").clone();
        match sign_on_behalf(conn, master_key, agent_id, &fields)
            .map_err(|e| AwebError::Internal(format!("custodial signing failed: {e}")))?
        {
            Some((did, sig, key_id)) => (Some(did), Some(sig), Some(key_id)),
            None => (from_did.map(String::from), None, signing_key_id.map(String::from)),
        }
    } else {
        (from_did.map(String::from), signature.map(String::from), signing_key_id.map(String::from))
    };

    conn.execute(
        "INSERT INTO chat_messages \
         (message_id, session_id, from_agent_id, from_alias, body, sender_leaving, hang_on, \
          from_did, to_did, signature, signing_key_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            message_id, session_id, agent_id, from_alias, body, leaving, hang_on,
            from_did, to_did, signature, signing_key_id, created_at,
        ],
    )
    .map_err(|e| AwebError::Internal(e.to_string()))?;

    // Sending advances the sender's own read receipt (their own message is,
    // trivially, read by them).
    conn.execute(
        "INSERT INTO chat_read_receipts (session_id, agent_id, last_read_message_id, last_read_at) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(session_id, agent_id) DO UPDATE SET \
            last_read_message_id = excluded.last_read_message_id, \
            last_read_at = excluded.last_read_at \
         WHERE chat_read_receipts.last_read_at IS NULL OR excluded.last_read_at > chat_read_receipts.last_read_at",
        params![session_id, agent_id, message_id, created_at],
    )
    .map_err(|e| AwebError::Internal(e.to_string()))?;

    Ok(SendOutcome {
        message_id,
        created_at,
        from_alias,
        from_did,
        to_did: to_did.map(String::from),
        signature,
        signing_key_id,
    })
}

pub fn history(
    conn: &Connection,
    session_id: &str,
    agent_id: &str,
    unread_only: bool,
    limit: i64,
) -> Result<Vec<ChatMessage>, AwebError> {
    if !is_participant(conn, session_id, agent_id)? {
        return Err(AwebError::Forbidden("not a participant in this session".to_string()));
    }

    let last_read_at: Option<String> = conn
        .query_row(
            "SELECT last_read_at FROM chat_read_receipts WHERE session_id = ?1 AND agent_id = ?2",
            params![session_id, agent_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    let query = if unread_only {
        "SELECT message_id, from_agent_id, from_alias, body, sender_leaving, hang_on, created_at, \
                from_did, to_did, signature, signing_key_id \
         FROM chat_messages \
         WHERE session_id = ?1 AND created_at > ?2 AND from_agent_id <> ?3 \
         ORDER BY created_at DESC LIMIT ?4"
    } else {
        "SELECT message_id, from_agent_id, from_alias, body, sender_leaving, hang_on, created_at, \
                from_did, to_did, signature, signing_key_id \
         FROM chat_messages WHERE session_id = ?1 \
         ORDER BY created_at DESC LIMIT ?4"
    };

    let cutoff = last_read_at.unwrap_or_default();
    let mut stmt = conn.prepare(query).map_err(|e| AwebError::Internal(e.to_string()))?;
    let rows = stmt
        .query_map(params![session_id, cutoff, agent_id, limit], |row| {
            Ok(ChatMessage {
                message_id: row.get(0)?,
                session_id: session_id.to_string(),
                from_agent_id: row.get(1)?,
                from_alias: row.get(2)?,
                body: row.get(3)?,
                sender_leaving: row.get(4)?,
                hang_on: row.get(5)?,
                created_at: row.get(6)?,
                from_did: row.get(7)?,
                to_did: row.get(8)?,
                signature: row.get(9)?,
                signing_key_id: row.get(10)?,
            })
        })
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    let mut messages: Vec<ChatMessage> = rows
        .collect::<Result<_, _>>()
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    messages.reverse();
    Ok(messages)
}

pub struct MarkReadOutcome {
    pub messages_marked: i64,
}

/// Advances the read cursor only if `up_to_message_id`'s creation time is
/// strictly newer than the message the stored cursor points to.
pub fn mark_read(
    conn: &Connection,
    session_id: &str,
    agent_id: &str,
    up_to_message_id: &str,
) -> Result<MarkReadOutcome, AwebError> {
    if !is_participant(conn, session_id, agent_id)? {
        return Err(AwebError::Forbidden("not a participant in this session".to_string()));
    }

    let up_to_time: Option<String> = conn
        .query_row(
            "SELECT created_at FROM chat_messages WHERE session_id = ?1 AND message_id = ?2",
            params![session_id, up_to_message_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    let up_to_time = up_to_time.ok_or_else(|| AwebError::NotFound("message not found".to_string()))?;

    let old_last_read_at: Option<String> = conn
        .query_row(
            "SELECT last_read_at FROM chat_read_receipts WHERE session_id = ?1 AND agent_id = ?2",
            params![session_id, agent_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    let marked: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM chat_messages \
             WHERE session_id = ?1 AND from_agent_id <> ?2 \
               AND created_at > ?3 AND created_at <= ?4",
            params![session_id, agent_id, old_last_read_at.clone().unwrap_or_default(), up_to_time],
            |r| r.get(0),
        )
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    let old_cursor_time: Option<String> = conn
        .query_row(
            "SELECT m.created_at FROM chat_read_receipts rr \
             JOIN chat_messages m ON m.message_id = rr.last_read_message_id \
             WHERE rr.session_id = ?1 AND rr.agent_id = ?2",
            params![session_id, agent_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    let advances = match old_cursor_time {
        Some(old) => up_to_time > old,
        None => true,
    };

    let mut messages_marked = 0;
    if advances {
        conn.execute(
            "INSERT INTO chat_read_receipts (session_id, agent_id, last_read_message_id, last_read_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(session_id, agent_id) DO UPDATE SET \
                last_read_message_id = excluded.last_read_message_id, \
                last_read_at = excluded.last_read_at",
            params![session_id, agent_id, up_to_message_id, Utc::now().to_rfc3339()],
        )
        .map_err(|e| AwebError::Internal(e.to_string()))?;
        messages_marked = marked;
    }

    Ok(MarkReadOutcome { messages_marked })
}

/// Per-session summary for `GET /v1/chat/pending`: participant aliases, last
/// message, whether any other participant is parked on the SSE stream, and
/// unread count since the actor's own read cursor.
pub fn pending_for_agent(conn: &Connection, waiting: &WaitingIndex, agent_id: &str) -> Result<Vec<PendingConversation>, AwebError> {
    let mut session_stmt = conn
        .prepare(
            "SELECT DISTINCT s.session_id FROM chat_sessions s \
             JOIN chat_session_participants p ON p.session_id = s.session_id \
             WHERE p.agent_id = ?1",
        )
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    let session_ids: Vec<String> = session_stmt
        .query_map(params![agent_id], |r| r.get(0))
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .collect::<Result<_, _>>()
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    let mut conversations = Vec::with_capacity(session_ids.len());
    for session_id in session_ids {
        let mut participant_stmt = conn
            .prepare("SELECT agent_id, alias FROM chat_session_participants WHERE session_id = ?1")
            .map_err(|e| AwebError::Internal(e.to_string()))?;
        let participants: Vec<(String, String)> = participant_stmt
            .query_map(params![session_id], |r| Ok((r.get(0)?, r.get(1)?)))
            .map_err(|e| AwebError::Internal(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| AwebError::Internal(e.to_string()))?;

        let last: Option<(String, String, String)> = conn
            .query_row(
                "SELECT from_alias, body, created_at FROM chat_messages \
                 WHERE session_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![session_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()
            .map_err(|e| AwebError::Internal(e.to_string()))?;

        let last_read_at: Option<String> = conn
            .query_row(
                "SELECT last_read_at FROM chat_read_receipts WHERE session_id = ?1 AND agent_id = ?2",
                params![session_id, agent_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| AwebError::Internal(e.to_string()))?;
        let cutoff = last_read_at.unwrap_or_default();

        let unread_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chat_messages \
                 WHERE session_id = ?1 AND from_agent_id <> ?2 AND created_at > ?3",
                params![session_id, agent_id, cutoff],
                |r| r.get(0),
            )
            .map_err(|e| AwebError::Internal(e.to_string()))?;

        let sender_waiting = participants
            .iter()
            .any(|(pid, _)| pid != agent_id && waiting.is_waiting(&session_id, pid));

        let (last_message, last_from, last_activity) = match last {
            Some((alias, body, created_at)) => (body, alias, Some(created_at)),
            None => (String::new(), String::new(), None),
        };

        conversations.push(PendingConversation {
            session_id,
            participants: participants.into_iter().map(|(_, alias)| alias).collect(),
            last_message,
            last_from,
            unread_count,
            sender_waiting,
            last_activity,
        });
    }

    conversations.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    Ok(conversations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_hash_is_order_independent() {
        let a = participant_hash(&["b".to_string(), "a".to_string()]);
        let b = participant_hash(&["a".to_string(), "b".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn participant_hash_dedupes() {
        let a = participant_hash(&["a".to_string(), "a".to_string(), "b".to_string()]);
        let b = participant_hash(&["a".to_string(), "b".to_string()]);
        assert_eq!(a, b);
    }
}
