//! `POST /v1/messages`, `GET /v1/messages/inbox`, `POST /v1/messages/{id}/ack`.

use rocket::serde::json::Json;
use rocket::{get, post, State};

use crate::auth::AuthContext;
use crate::config::Config;
use crate::db::Db;
use crate::error::AwebError;
use crate::events::{AwebEvent, EventBus};
use crate::identity::lifecycle::fetch_agent_by_id;
use crate::mail;
use crate::models::{InboxQuery, MailMessage, SendMailRequest};

#[post("/messages", data = "<req>")]
pub fn send_mail(
    db: &State<Db>,
    config: &State<Config>,
    events: &State<EventBus>,
    auth: AuthContext,
    req: Json<SendMailRequest>,
) -> Result<Json<MailMessage>, AwebError> {
    let from_agent_id = auth.require_agent()?;
    let req = req.into_inner();
    let conn = db.conn.lock().unwrap();

    let to_agent_id: String = conn
        .query_row(
            "SELECT agent_id FROM agents WHERE project_id = ?1 AND alias = ?2 AND deleted_at IS NULL",
            rusqlite::params![auth.project_id, req.to_alias],
            |r| r.get(0),
        )
        .map_err(|_| AwebError::NotFound("recipient not found".to_string()))?;

    let sender = fetch_agent_by_id(&conn, from_agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .ok_or_else(|| AwebError::NotFound("agent not found".to_string()))?;

    let outcome = mail::deliver(
        &conn,
        config.custody_master_key.as_ref(),
        &auth.project_id,
        from_agent_id,
        &sender.alias,
        &to_agent_id,
        &req.subject,
        &req.body,
        &req.priority,
        req.thread_id.as_deref(),
        req.identity.from_did.as_deref(),
        req.identity.to_did.as_deref(),
        req.identity.signature.as_deref(),
        req.identity.signing_key_id.as_deref(),
    )?;

    events.publish(AwebEvent::MessageSent {
        project_id: auth.project_id.clone(),
        message_id: outcome.message_id.clone(),
        from_agent_id: from_agent_id.to_string(),
        to_agent_id: to_agent_id.clone(),
    });

    Ok(Json(MailMessage {
        message_id: outcome.message_id,
        from_agent_id: from_agent_id.to_string(),
        from_alias: sender.alias,
        to_agent_id,
        subject: req.subject,
        body: req.body,
        priority: req.priority,
        thread_id: req.thread_id,
        created_at: outcome.created_at,
        read_at: None,
        rotation_announcement: None,
        from_did: outcome.from_did,
        to_did: outcome.to_did,
        signature: outcome.signature,
        signing_key_id: outcome.signing_key_id,
    }))
}

#[get("/messages/inbox?<unread_only>&<limit>")]
pub fn inbox(
    db: &State<Db>,
    auth: AuthContext,
    unread_only: Option<bool>,
    limit: Option<i64>,
) -> Result<Json<Vec<MailMessage>>, AwebError> {
    let agent_id = auth.require_agent()?;
    let query = InboxQuery {
        unread_only: unread_only.unwrap_or(false),
        limit: limit.unwrap_or(200),
    };
    let conn = db.conn.lock().unwrap();
    let messages = mail::inbox(&conn, &auth.project_id, agent_id, query.unread_only, query.limit)?;
    Ok(Json(messages))
}

#[post("/messages/<message_id>/ack")]
pub fn acknowledge(
    db: &State<Db>,
    events: &State<EventBus>,
    auth: AuthContext,
    message_id: &str,
) -> Result<Json<serde_json::Value>, AwebError> {
    let agent_id = auth.require_agent()?;
    let conn = db.conn.lock().unwrap();
    mail::acknowledge(&conn, &auth.project_id, agent_id, message_id)?;

    events.publish(AwebEvent::MessageAcknowledged {
        project_id: auth.project_id.clone(),
        to_agent_id: agent_id.to_string(),
    });

    Ok(Json(serde_json::json!({ "acknowledged": true })))
}
