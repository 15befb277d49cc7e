//! Agent directory, presence, alias suggestion, rotation/retirement/
//! deregistration, and the append-only per-agent log.

use rocket::serde::json::Json;
use rocket::{delete, get, patch, post, put, State};

use crate::alias::suggest_next_name_prefix;
use crate::auth::AuthContext;
use crate::config::Config;
use crate::db::Db;
use crate::error::AwebError;
use crate::events::{AwebEvent, EventBus};
use crate::identity::did::did_from_public_key;
use crate::identity::lifecycle::{deregister, fetch_agent_by_id, list_agents_for_tenant, retire, rotate};
use crate::models::{Agent, AgentKind, PatchAgentRequest, RetireRequest, RotateRequest, SuggestAliasRequest};
use crate::presence::PresenceIndex;

#[get("/agents?<include_internal>")]
pub fn list_agents(db: &State<Db>, auth: AuthContext, include_internal: Option<bool>) -> Result<Json<Vec<Agent>>, AwebError> {
    let conn = db.conn.lock().unwrap();
    let mut agents = list_agents_for_tenant(&conn, &auth.project_id).map_err(|e| AwebError::Internal(e.to_string()))?;
    if !include_internal.unwrap_or(false) {
        agents.retain(|a| a.kind != AgentKind::Human);
    }
    Ok(Json(agents))
}

#[post("/agents/heartbeat")]
pub fn heartbeat(
    presence: &State<PresenceIndex>,
    config: &State<Config>,
    auth: AuthContext,
    db: &State<Db>,
) -> Result<Json<serde_json::Value>, AwebError> {
    let agent_id = auth.require_agent()?;
    let conn = db.conn.lock().unwrap();
    let agent = fetch_agent_by_id(&conn, agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .ok_or_else(|| AwebError::NotFound("agent not found".to_string()))?;

    let last_seen = presence.update(&auth.project_id, agent_id, &agent.alias, "active", config.presence_ttl_seconds);
    Ok(Json(serde_json::json!({ "status": "active", "last_seen": last_seen })))
}

#[patch("/agents/<agent_id>", data = "<req>")]
pub fn patch_agent(db: &State<Db>, auth: AuthContext, agent_id: &str, req: Json<PatchAgentRequest>) -> Result<Json<Agent>, AwebError> {
    let conn = db.conn.lock().unwrap();
    fetch_agent_by_id(&conn, agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .filter(|a| a.project_id == auth.project_id)
        .ok_or_else(|| AwebError::NotFound("agent not found".to_string()))?;

    if let Some(access_mode) = req.access_mode {
        let policy_str = match access_mode {
            crate::models::AccessPolicy::Open => "open",
            crate::models::AccessPolicy::ContactsOnly => "contacts_only",
        };
        conn.execute(
            "UPDATE agents SET access_policy = ?1 WHERE agent_id = ?2",
            rusqlite::params![policy_str, agent_id],
        )
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    }

    fetch_agent_by_id(&conn, agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .ok_or_else(|| AwebError::Internal("agent vanished after patch".to_string()))
        .map(Json)
}

#[post("/agents/suggest-alias-prefix", data = "<req>")]
pub fn suggest_alias(db: &State<Db>, auth: AuthContext, req: Json<SuggestAliasRequest>) -> Result<Json<serde_json::Value>, AwebError> {
    let _ = &req.prefix;
    let conn = db.conn.lock().unwrap();
    let mut stmt = conn
        .prepare("SELECT alias FROM agents WHERE project_id = ?1 AND deleted_at IS NULL")
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    let existing: Vec<String> = stmt
        .query_map([&auth.project_id], |r| r.get(0))
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .collect::<Result<_, _>>()
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    let suggestion = suggest_next_name_prefix(existing.iter().map(String::as_str))
        .ok_or_else(|| AwebError::Conflict("alias candidate sequence exhausted".to_string()))?;

    Ok(Json(serde_json::json!({ "suggested_prefix": suggestion })))
}

#[get("/agents/resolve/<slug>/<alias>")]
pub fn resolve_agent(db: &State<Db>, _auth: AuthContext, slug: &str, alias: &str) -> Result<Json<serde_json::Value>, AwebError> {
    let conn = db.conn.lock().unwrap();
    conn.query_row(
        "SELECT a.agent_id, a.alias, a.display_name, a.did, a.public_key, a.kind \
         FROM agents a JOIN tenants t ON t.project_id = a.project_id \
         WHERE t.slug = ?1 AND a.alias = ?2 AND a.deleted_at IS NULL AND t.deleted_at IS NULL",
        rusqlite::params![slug, alias],
        |r| {
            Ok(serde_json::json!({
                "agent_id": r.get::<_, String>(0)?,
                "alias": r.get::<_, String>(1)?,
                "display_name": r.get::<_, String>(2)?,
                "did": r.get::<_, Option<String>>(3)?,
                "public_key": r.get::<_, Option<String>>(4)?,
                "kind": r.get::<_, String>(5)?,
            }))
        },
    )
    .map(Json)
    .map_err(|_| AwebError::NotFound("agent not found".to_string()))
}

fn resolve_target_agent_id(auth: &AuthContext, path_id: &str) -> Result<String, AwebError> {
    if path_id == "me" {
        auth.require_agent().map(str::to_string)
    } else {
        let agent_id = auth.require_agent()?;
        if agent_id != path_id {
            return Err(AwebError::Forbidden("cannot act on another agent's identity".to_string()));
        }
        Ok(agent_id.to_string())
    }
}

#[put("/agents/<id>/rotate", data = "<req>")]
pub fn rotate_agent(
    db: &State<Db>,
    config: &State<Config>,
    auth: AuthContext,
    id: &str,
    req: Json<RotateRequest>,
) -> Result<Json<Agent>, AwebError> {
    let agent_id = resolve_target_agent_id(&auth, id)?;
    let req = req.into_inner();

    let public_key_bytes: [u8; 32] = hex::decode(&req.new_public_key)
        .map_err(|_| AwebError::Validation("new_public_key must be hex-encoded".to_string()))?
        .try_into()
        .map_err(|_| AwebError::Validation("new_public_key must be 32 bytes".to_string()))?;

    if did_from_public_key(&public_key_bytes) != req.new_did {
        return Err(AwebError::Validation("new_did does not match new_public_key".to_string()));
    }

    let conn = db.conn.lock().unwrap();
    let outcome = rotate(
        &conn,
        config.custody_master_key.as_ref(),
        &agent_id,
        &req.new_did,
        &public_key_bytes,
        req.custody,
        req.rotation_signature.as_deref(),
        &req.timestamp,
    )?;
    Ok(Json(outcome.agent))
}

#[put("/agents/<id>/retire", data = "<req>")]
pub fn retire_agent(
    db: &State<Db>,
    config: &State<Config>,
    auth: AuthContext,
    id: &str,
    req: Json<RetireRequest>,
) -> Result<Json<Agent>, AwebError> {
    let agent_id = resolve_target_agent_id(&auth, id)?;
    let req = req.into_inner();
    let conn = db.conn.lock().unwrap();
    let agent = retire(
        &conn,
        config.custody_master_key.as_ref(),
        &agent_id,
        &req.successor_agent_id,
        req.retirement_proof.as_deref(),
        &req.timestamp,
    )?;
    Ok(Json(agent))
}

#[delete("/agents/me")]
pub fn deregister_self(
    db: &State<Db>,
    events: &State<EventBus>,
    presence: &State<PresenceIndex>,
    auth: AuthContext,
) -> Result<Json<serde_json::Value>, AwebError> {
    let agent_id = auth.require_agent()?;
    let conn = db.conn.lock().unwrap();
    deregister(&conn, agent_id)?;
    presence.clear(&auth.project_id, agent_id);
    events.publish(AwebEvent::AgentDeregistered {
        project_id: auth.project_id.clone(),
        agent_id: agent_id.to_string(),
    });
    Ok(Json(serde_json::json!({ "deregistered": true })))
}

/// Cross-tenant peer deregister. Per spec: a missing tenant/alias is
/// not-found, never forbidden (no tenant-existence leak).
#[delete("/agents/<slug>/<alias>")]
pub fn deregister_peer(
    db: &State<Db>,
    events: &State<EventBus>,
    presence: &State<PresenceIndex>,
    auth: AuthContext,
    slug: &str,
    alias: &str,
) -> Result<Json<serde_json::Value>, AwebError> {
    let conn = db.conn.lock().unwrap();
    let target: Option<(String, String)> = conn
        .query_row(
            "SELECT a.agent_id, a.project_id FROM agents a JOIN tenants t ON t.project_id = a.project_id \
             WHERE t.slug = ?1 AND a.alias = ?2 AND a.deleted_at IS NULL AND t.deleted_at IS NULL",
            rusqlite::params![slug, alias],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .ok();

    // A peer deregister is scoped to the caller's own tenant; a match in a
    // different tenant looks identical to no match (no tenant-existence leak).
    let (agent_id, project_id) = target
        .filter(|(_, project_id)| *project_id == auth.project_id)
        .ok_or_else(|| AwebError::NotFound("agent not found".to_string()))?;
    deregister(&conn, &agent_id)?;
    presence.clear(&project_id, &agent_id);
    events.publish(AwebEvent::AgentDeregistered { project_id, agent_id });
    Ok(Json(serde_json::json!({ "deregistered": true })))
}

#[get("/agents/me/log")]
pub fn get_log(db: &State<Db>, auth: AuthContext) -> Result<Json<Vec<serde_json::Value>>, AwebError> {
    let agent_id = auth.require_agent()?;
    let conn = db.conn.lock().unwrap();
    let mut stmt = conn
        .prepare(
            "SELECT entry_id, operation, prior_did, new_did, signer_did, entry_signature, metadata, created_at \
             FROM agent_log WHERE agent_id = ?1 ORDER BY created_at DESC",
        )
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    let rows = stmt
        .query_map([agent_id], |r| {
            Ok(serde_json::json!({
                "entry_id": r.get::<_, String>(0)?,
                "operation": r.get::<_, String>(1)?,
                "prior_did": r.get::<_, Option<String>>(2)?,
                "new_did": r.get::<_, Option<String>>(3)?,
                "signer_did": r.get::<_, Option<String>>(4)?,
                "entry_signature": r.get::<_, Option<String>>(5)?,
                "metadata": r.get::<_, String>(6)?,
                "created_at": r.get::<_, String>(7)?,
            }))
        })
        .map_err(|e| AwebError::Internal(e.to_string()))?;
    let entries: Vec<serde_json::Value> = rows.collect::<Result<_, _>>().map_err(|e| AwebError::Internal(e.to_string()))?;
    Ok(Json(entries))
}
