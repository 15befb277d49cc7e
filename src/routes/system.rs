//! Ambient endpoints: health, auth introspection, tenant lookup, operational
//! stats, and the two catchers mounted by `lib.rs`.

use rocket::serde::json::Json;
use rocket::{get, State};

use crate::auth::AuthContext;
use crate::db::Db;
use crate::error::AwebError;
use crate::identity::lifecycle::fetch_agent_by_id;
use crate::models::{AuthIntrospection, Tenant};

#[get("/health")]
pub fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "aweb",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[get("/auth/introspect")]
pub fn introspect(db: &State<Db>, auth: AuthContext) -> Result<Json<AuthIntrospection>, AwebError> {
    let conn = db.conn.lock().unwrap();
    let agent = match &auth.agent_id {
        Some(agent_id) => {
            fetch_agent_by_id(&conn, agent_id).map_err(|e| AwebError::Internal(e.to_string()))?
        }
        None => None,
    };

    Ok(Json(AuthIntrospection {
        project_id: auth.project_id,
        principal_type: Some(if auth.agent_id.is_some() { "agent" } else { "project" }.to_string()),
        agent_id: auth.agent_id,
        alias: agent.as_ref().map(|a| a.alias.clone()),
        display_name: agent.as_ref().map(|a| a.display_name.clone()),
        kind: agent.as_ref().map(|a| a.kind),
    }))
}

#[get("/projects/current")]
pub fn projects_current(db: &State<Db>, auth: AuthContext) -> Result<Json<Tenant>, AwebError> {
    let conn = db.conn.lock().unwrap();
    conn.query_row(
        "SELECT project_id, slug, name FROM tenants WHERE project_id = ?1",
        [&auth.project_id],
        |r| {
            Ok(Tenant {
                project_id: r.get(0)?,
                slug: r.get(1)?,
                name: r.get(2)?,
            })
        },
    )
    .map(Json)
    .map_err(|_| AwebError::NotFound("tenant not found".to_string()))
}

#[get("/stats")]
pub fn stats(db: &State<Db>, auth: AuthContext) -> Json<serde_json::Value> {
    let conn = db.conn.lock().unwrap();

    let agent_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM agents WHERE project_id = ?1 AND deleted_at IS NULL",
            [&auth.project_id],
            |r| r.get(0),
        )
        .unwrap_or(0);
    let active_agents: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM agents WHERE project_id = ?1 AND status = 'active'",
            [&auth.project_id],
            |r| r.get(0),
        )
        .unwrap_or(0);
    let mail_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM mail_messages WHERE project_id = ?1",
            [&auth.project_id],
            |r| r.get(0),
        )
        .unwrap_or(0);
    let unread_mail: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM mail_messages WHERE project_id = ?1 AND read_at IS NULL",
            [&auth.project_id],
            |r| r.get(0),
        )
        .unwrap_or(0);
    let session_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM chat_sessions WHERE project_id = ?1",
            [&auth.project_id],
            |r| r.get(0),
        )
        .unwrap_or(0);
    let reservation_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM reservations WHERE project_id = ?1",
            [&auth.project_id],
            |r| r.get(0),
        )
        .unwrap_or(0);
    let contact_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM contacts WHERE project_id = ?1",
            [&auth.project_id],
            |r| r.get(0),
        )
        .unwrap_or(0);

    Json(serde_json::json!({
        "agents": agent_count,
        "agents_active": active_agents,
        "mail": {
            "total": mail_count,
            "unread": unread_mail
        },
        "chat_sessions": session_count,
        "reservations": reservation_count,
        "contacts": contact_count
    }))
}

#[rocket::catch(429)]
pub fn too_many_requests() -> Json<serde_json::Value> {
    Json(serde_json::json!({"detail": "too many requests"}))
}

#[rocket::catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({"detail": "not found"}))
}
