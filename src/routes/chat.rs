//! `POST/GET /v1/chat/sessions`, `GET /v1/chat/pending`, session history,
//! read receipts, and the SSE stream (`GET /v1/chat/sessions/{id}/stream`).
//!
//! The live half of the stream mirrors the teacher's `routes/stream.rs`:
//! an initial replay burst followed by a `tokio::select!` loop over the
//! event bus and a heartbeat tick, with a waiting-index guard that
//! unregisters on every exit path (RAII, matching `PresenceGuard`).

use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket::{get, post, State};
use tokio::time::{interval, Duration};

use crate::auth::AuthContext;
use crate::chat::session::{self, Participant};
use crate::chat::stream::replay_since;
use crate::config::Config;
use crate::db::Db;
use crate::error::AwebError;
use crate::events::{AwebEvent, EventBus};
use crate::identity::lifecycle::fetch_agent_by_id;
use crate::models::{
    ChatMessage, ChatSession, CreateSessionRequest, MarkReadRequest, PendingConversation, SendSessionMessageRequest,
};
use crate::presence::WaitingIndex;

/// Unregisters the (session, agent) waiting entry when the stream ends,
/// on every exit path: deadline, client disconnect, or event bus closure.
struct WaitingGuard {
    waiting: WaitingIndex,
    session_id: String,
    agent_id: String,
}

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.waiting.unregister(&self.session_id, &self.agent_id);
    }
}

#[post("/chat/sessions", data = "<req>")]
pub fn create_or_send_session(
    db: &State<Db>,
    config: &State<Config>,
    events: &State<EventBus>,
    auth: AuthContext,
    req: Json<CreateSessionRequest>,
) -> Result<Json<ChatSession>, AwebError> {
    let agent_id = auth.require_agent()?;
    let req = req.into_inner();
    let conn = db.conn.lock().unwrap();

    let me = fetch_agent_by_id(&conn, agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .ok_or_else(|| AwebError::NotFound("agent not found".to_string()))?;

    let mut participants = vec![Participant { agent_id: me.agent_id.clone(), alias: me.alias.clone() }];
    for alias in &req.to_aliases {
        let (peer_id, peer_alias): (String, String) = conn
            .query_row(
                "SELECT agent_id, alias FROM agents WHERE project_id = ?1 AND alias = ?2 AND deleted_at IS NULL",
                rusqlite::params![auth.project_id, alias],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(|_| AwebError::NotFound(format!("agent '{alias}' not found")))?;
        participants.push(Participant { agent_id: peer_id, alias: peer_alias });
    }

    let session_id = session::ensure_session(&conn, &auth.project_id, &participants)?;

    if let Some(body) = req.message.as_deref() {
        let outcome = session::send(
            &conn,
            config.custody_master_key.as_ref(),
            &session_id,
            agent_id,
            body,
            false,
            req.hang_on,
            req.identity.from_did.as_deref(),
            req.identity.to_did.as_deref(),
            req.identity.signature.as_deref(),
            req.identity.signing_key_id.as_deref(),
        )?;
        events.publish(AwebEvent::ChatMessageSent {
            project_id: auth.project_id.clone(),
            session_id: session_id.clone(),
            message: ChatMessage {
                message_id: outcome.message_id,
                session_id: session_id.clone(),
                from_agent_id: agent_id.to_string(),
                from_alias: outcome.from_alias,
                body: body.to_string(),
                sender_leaving: false,
                hang_on: req.hang_on,
                sender_waiting: false,
                created_at: outcome.created_at,
                from_did: outcome.from_did,
                to_did: outcome.to_did,
                signature: outcome.signature,
                signing_key_id: outcome.signing_key_id,
            },
        });
    }

    Ok(Json(ChatSession {
        session_id,
        participants: participants.into_iter().map(|p| p.alias).collect(),
        created_at: chrono::Utc::now().to_rfc3339(),
    }))
}

#[get("/chat/sessions")]
pub fn list_sessions(db: &State<Db>, auth: AuthContext) -> Result<Json<Vec<ChatSession>>, AwebError> {
    let agent_id = auth.require_agent()?;
    let conn = db.conn.lock().unwrap();

    let mut stmt = conn
        .prepare(
            "SELECT s.session_id, s.created_at FROM chat_sessions s \
             JOIN chat_session_participants p ON p.session_id = s.session_id \
             WHERE s.project_id = ?1 AND p.agent_id = ?2 ORDER BY s.created_at DESC",
        )
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    let rows: Vec<(String, String)> = stmt
        .query_map(rusqlite::params![auth.project_id, agent_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .collect::<Result<_, _>>()
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    let mut sessions = Vec::with_capacity(rows.len());
    for (session_id, created_at) in rows {
        let mut p_stmt = conn
            .prepare("SELECT alias FROM chat_session_participants WHERE session_id = ?1")
            .map_err(|e| AwebError::Internal(e.to_string()))?;
        let participants: Vec<String> = p_stmt
            .query_map(rusqlite::params![session_id], |r| r.get(0))
            .map_err(|e| AwebError::Internal(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| AwebError::Internal(e.to_string()))?;
        sessions.push(ChatSession { session_id, participants, created_at });
    }

    Ok(Json(sessions))
}

#[get("/chat/pending")]
pub fn pending(db: &State<Db>, waiting: &State<WaitingIndex>, auth: AuthContext) -> Result<Json<Vec<PendingConversation>>, AwebError> {
    let agent_id = auth.require_agent()?;
    let conn = db.conn.lock().unwrap();
    let conversations = session::pending_for_agent(&conn, waiting, agent_id)?;
    Ok(Json(conversations))
}

#[get("/chat/sessions/<session_id>/messages?<unread_only>&<limit>")]
pub fn session_history(
    db: &State<Db>,
    auth: AuthContext,
    session_id: &str,
    unread_only: Option<bool>,
    limit: Option<i64>,
) -> Result<Json<Vec<ChatMessage>>, AwebError> {
    let agent_id = auth.require_agent()?;
    let conn = db.conn.lock().unwrap();
    let messages = session::history(&conn, session_id, agent_id, unread_only.unwrap_or(false), limit.unwrap_or(200))?;
    Ok(Json(messages))
}

#[post("/chat/sessions/<session_id>/messages", data = "<req>")]
pub fn send_session_message(
    db: &State<Db>,
    config: &State<Config>,
    events: &State<EventBus>,
    auth: AuthContext,
    session_id: &str,
    req: Json<SendSessionMessageRequest>,
) -> Result<Json<ChatMessage>, AwebError> {
    let agent_id = auth.require_agent()?;
    let req = req.into_inner();
    let conn = db.conn.lock().unwrap();

    let outcome = session::send(
        &conn,
        config.custody_master_key.as_ref(),
        session_id,
        agent_id,
        &req.body,
        req.leaving,
        req.hang_on,
        req.identity.from_did.as_deref(),
        req.identity.to_did.as_deref(),
        req.identity.signature.as_deref(),
        req.identity.signing_key_id.as_deref(),
    )?;

    let message = ChatMessage {
        message_id: outcome.message_id,
        session_id: session_id.to_string(),
        from_agent_id: agent_id.to_string(),
        from_alias: outcome.from_alias,
        body: req.body,
        sender_leaving: req.leaving,
        hang_on: req.hang_on,
        sender_waiting: false,
        created_at: outcome.created_at,
        from_did: outcome.from_did,
        to_did: outcome.to_did,
        signature: outcome.signature,
        signing_key_id: outcome.signing_key_id,
    };

    events.publish(AwebEvent::ChatMessageSent {
        project_id: auth.project_id.clone(),
        session_id: session_id.to_string(),
        message: message.clone(),
    });

    Ok(Json(message))
}

#[post("/chat/sessions/<session_id>/read", data = "<req>")]
pub fn mark_read(
    db: &State<Db>,
    events: &State<EventBus>,
    auth: AuthContext,
    session_id: &str,
    req: Json<MarkReadRequest>,
) -> Result<Json<serde_json::Value>, AwebError> {
    let agent_id = auth.require_agent()?;
    let req = req.into_inner();
    let conn = db.conn.lock().unwrap();

    let outcome = session::mark_read(&conn, session_id, agent_id, &req.up_to_message_id)?;

    let reader_alias = fetch_agent_by_id(&conn, agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .map(|a| a.alias)
        .unwrap_or_default();

    events.publish(AwebEvent::ReadReceiptUpdated {
        project_id: auth.project_id.clone(),
        session_id: session_id.to_string(),
        agent_id: agent_id.to_string(),
        reader_alias,
        up_to_message_id: req.up_to_message_id,
        timestamp: chrono::Utc::now().to_rfc3339(),
        extends_wait_seconds: 300,
    });

    Ok(Json(serde_json::json!({ "messages_marked": outcome.messages_marked })))
}

#[get("/chat/sessions/<session_id>/stream?<deadline>&<after>")]
pub fn session_stream(
    db: &State<Db>,
    events: &State<EventBus>,
    waiting: &State<WaitingIndex>,
    auth: AuthContext,
    session_id: &str,
    deadline: Option<i64>,
    after: Option<&str>,
) -> Result<EventStream![], AwebError> {
    let agent_id = auth.require_agent()?.to_string();
    {
        let conn = db.conn.lock().unwrap();
        if !session::is_participant(&conn, session_id, &agent_id)? {
            return Err(AwebError::Forbidden("not a participant in this session".to_string()));
        }
    }

    let mut rx = events.sender.subscribe();
    let session_id = session_id.to_string();
    let waiting = waiting.inner().clone();
    waiting.register(&session_id, &agent_id);

    let replay = {
        let conn = db.conn.lock().unwrap();
        replay_since(&conn, &waiting, &session_id, after)?
    };

    let deadline_secs = deadline.unwrap_or(600).clamp(1, 600) as u64;

    Ok(EventStream! {
        let _guard = WaitingGuard { waiting: waiting.clone(), session_id: session_id.clone(), agent_id: agent_id.clone() };

        for message in replay {
            yield Event::json(&message).event("message");
        }

        let mut refresh = interval(Duration::from_secs(30));
        let mut deadline_sleep = Box::pin(tokio::time::sleep(Duration::from_secs(deadline_secs)));

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Ok(AwebEvent::ChatMessageSent { session_id: ref sid, ref message, .. }) if *sid == session_id => {
                            yield Event::json(message).event("message");
                        }
                        Ok(AwebEvent::ReadReceiptUpdated {
                            session_id: ref sid, agent_id: ref acker, ref reader_alias, ref up_to_message_id,
                            ref timestamp, extends_wait_seconds, ..
                        }) if *sid == session_id && *acker != agent_id => {
                            yield Event::json(&serde_json::json!({
                                "reader_alias": reader_alias,
                                "up_to_message_id": up_to_message_id,
                                "timestamp": timestamp,
                                "extends_wait_seconds": extends_wait_seconds,
                            })).event("read_receipt");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        _ => {}
                    }
                }
                _ = refresh.tick() => {
                    waiting.register(&session_id, &agent_id);
                }
                _ = &mut deadline_sleep => {
                    break;
                }
            }
        }
    })
}
