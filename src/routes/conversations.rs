//! `GET /v1/conversations` — a merged view of mail threads and chat sessions,
//! newest activity first, for an agent that doesn't want to poll two endpoints.

use std::collections::HashMap;

use rocket::serde::json::Json;
use rocket::{get, State};

use crate::auth::AuthContext;
use crate::db::Db;
use crate::error::AwebError;
use crate::models::ConversationSummary;

#[get("/conversations?<cursor>&<limit>")]
pub fn list_conversations(
    db: &State<Db>,
    auth: AuthContext,
    cursor: Option<&str>,
    limit: Option<i64>,
) -> Result<Json<Vec<ConversationSummary>>, AwebError> {
    let agent_id = auth.require_agent()?;
    let conn = db.conn.lock().unwrap();
    let limit = limit.unwrap_or(50);

    let mut mail_stmt = conn
        .prepare(
            "SELECT from_agent_id, from_alias, to_agent_id, body, created_at, read_at \
             FROM mail_messages WHERE project_id = ?1 AND (from_agent_id = ?2 OR to_agent_id = ?2)",
        )
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    struct MailRow {
        from_agent_id: String,
        from_alias: String,
        to_agent_id: String,
        body: String,
        created_at: String,
        read_at: Option<String>,
    }
    let mail_rows: Vec<MailRow> = mail_stmt
        .query_map(rusqlite::params![auth.project_id, agent_id], |r| {
            Ok(MailRow {
                from_agent_id: r.get(0)?,
                from_alias: r.get(1)?,
                to_agent_id: r.get(2)?,
                body: r.get(3)?,
                created_at: r.get(4)?,
                read_at: r.get(5)?,
            })
        })
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .collect::<Result<_, _>>()
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    let mut by_peer: HashMap<String, ConversationSummary> = HashMap::new();
    for row in mail_rows {
        let peer_id = if row.from_agent_id == agent_id { row.to_agent_id.clone() } else { row.from_agent_id.clone() };
        let peer_alias = if row.from_agent_id == agent_id {
            conn.query_row("SELECT alias FROM agents WHERE agent_id = ?1", [&peer_id], |r| r.get(0))
                .unwrap_or_else(|_| peer_id.clone())
        } else {
            row.from_alias.clone()
        };
        let unread = row.read_at.is_none() && row.to_agent_id == agent_id;

        let entry = by_peer.entry(format!("mail:{peer_id}")).or_insert_with(|| ConversationSummary {
            kind: "mail".to_string(),
            conversation_id: peer_id.clone(),
            peer_alias: peer_alias.clone(),
            last_message: String::new(),
            last_activity: String::new(),
            unread_count: 0,
        });
        if row.created_at > entry.last_activity {
            entry.last_activity = row.created_at;
            entry.last_message = row.body;
        }
        if unread {
            entry.unread_count += 1;
        }
    }

    let mut session_stmt = conn
        .prepare(
            "SELECT DISTINCT s.session_id FROM chat_sessions s \
             JOIN chat_session_participants p ON p.session_id = s.session_id \
             WHERE p.agent_id = ?1",
        )
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    let session_ids: Vec<String> = session_stmt
        .query_map([agent_id], |r| r.get(0))
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .collect::<Result<_, _>>()
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    let mut conversations: Vec<ConversationSummary> = by_peer.into_values().collect();

    for session_id in session_ids {
        let peers: Vec<String> = {
            let mut p_stmt = conn
                .prepare("SELECT alias FROM chat_session_participants WHERE session_id = ?1 AND agent_id <> ?2")
                .map_err(|e| AwebError::Internal(e.to_string()))?;
            p_stmt
                .query_map(rusqlite::params![session_id, agent_id], |r| r.get(0))
                .map_err(|e| AwebError::Internal(e.to_string()))?
                .collect::<Result<_, _>>()
                .map_err(|e| AwebError::Internal(e.to_string()))?
        };

        let last: Option<(String, String)> = conn
            .query_row(
                "SELECT body, created_at FROM chat_messages WHERE session_id = ?1 ORDER BY created_at DESC LIMIT 1",
                [&session_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .ok();

        let last_read_at: Option<String> = conn
            .query_row(
                "SELECT last_read_at FROM chat_read_receipts WHERE session_id = ?1 AND agent_id = ?2",
                rusqlite::params![session_id, agent_id],
                |r| r.get(0),
            )
            .ok()
            .flatten();
        let cutoff = last_read_at.unwrap_or_default();

        let unread_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chat_messages WHERE session_id = ?1 AND from_agent_id <> ?2 AND created_at > ?3",
                rusqlite::params![session_id, agent_id, cutoff],
                |r| r.get(0),
            )
            .unwrap_or(0);

        let (last_message, last_activity) = last.unwrap_or_default();
        conversations.push(ConversationSummary {
            kind: "chat".to_string(),
            conversation_id: session_id,
            peer_alias: peers.join(", "),
            last_message,
            last_activity,
            unread_count,
        });
    }

    conversations.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    if let Some(cursor) = cursor {
        conversations.retain(|c| c.last_activity.as_str() < cursor);
    }
    conversations.truncate(limit.max(0) as usize);

    Ok(Json(conversations))
}
