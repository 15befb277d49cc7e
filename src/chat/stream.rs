//! Replay support for the chat SSE stream (`GET /v1/chat/{session_id}/stream`).
//!
//! The live half of the stream (subscribe to `EventBus`, `EventStream!`) lives
//! in `routes::chat` next to the other Rocket handlers, following the
//! teacher's `routes/stream.rs` split of "replay query here, generator there".

use std::collections::HashMap;

use rusqlite::{params, Connection};

use crate::error::AwebError;
use crate::models::ChatMessage;
use crate::presence::WaitingIndex;

/// Messages created after `since` (an RFC3339 timestamp), oldest first, for
/// the initial replay burst before the stream switches to live events.
/// `sender_waiting` is resolved once per distinct sender rather than once per
/// row, since `WaitingIndex` lookups are repeatable within the same batch.
pub fn replay_since(
    conn: &Connection,
    waiting: &WaitingIndex,
    session_id: &str,
    since: Option<&str>,
) -> Result<Vec<ChatMessage>, AwebError> {
    let cutoff = since.unwrap_or("");
    let mut stmt = conn
        .prepare(
            "SELECT message_id, from_agent_id, from_alias, body, sender_leaving, hang_on, created_at, \
                    from_did, to_did, signature, signing_key_id \
             FROM chat_messages WHERE session_id = ?1 AND created_at > ?2 \
             ORDER BY created_at ASC LIMIT 50",
        )
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    let rows = stmt
        .query_map(params![session_id, cutoff], |row| {
            Ok(ChatMessage {
                message_id: row.get(0)?,
                session_id: session_id.to_string(),
                from_agent_id: row.get(1)?,
                from_alias: row.get(2)?,
                body: row.get(3)?,
                sender_leaving: row.get(4)?,
                hang_on: row.get(5)?,
                sender_waiting: false,
                created_at: row.get(6)?,
                from_did: row.get(7)?,
                to_did: row.get(8)?,
                signature: row.get(9)?,
                signing_key_id: row.get(10)?,
            })
        })
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    let mut messages: Vec<ChatMessage> = rows.collect::<Result<_, _>>().map_err(|e| AwebError::Internal(e.to_string()))?;

    let mut waiting_by_sender: HashMap<String, bool> = HashMap::new();
    for message in &mut messages {
        let is_waiting = *waiting_by_sender
            .entry(message.from_agent_id.clone())
            .or_insert_with(|| waiting.is_waiting(session_id, &message.from_agent_id));
        message.sender_waiting = is_waiting;
    }

    Ok(messages)
}
