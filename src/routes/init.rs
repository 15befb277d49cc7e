//! `POST /v1/init` — find-or-create a tenant and bootstrap its first agent.

use rocket::serde::json::Json;
use rocket::{post, State};

use crate::db::Db;
use crate::error::AwebError;
use crate::events::{AwebEvent, EventBus};
use crate::identity::lifecycle::{bootstrap_identity, ensure_tenant};
use crate::models::{AgentKind, InitRequest, InitResponse};

#[post("/init", data = "<req>")]
pub fn init(db: &State<Db>, events: &State<EventBus>, req: Json<InitRequest>) -> Result<Json<InitResponse>, AwebError> {
    let req = req.into_inner();
    let conn = db.conn.lock().unwrap();

    let tenant = ensure_tenant(&conn, &req.project_slug, &req.project_name)?;

    let kind = if req.agent_type == "human" {
        AgentKind::Human
    } else {
        AgentKind::Agent
    };

    let result = bootstrap_identity(
        &conn,
        &tenant.project_id,
        req.alias.as_deref(),
        &req.human_name,
        kind,
        req.did.as_deref(),
        req.public_key.as_deref(),
    )?;

    events.publish(AwebEvent::AgentCreated {
        project_id: tenant.project_id.clone(),
        agent_id: result.agent.agent_id.clone(),
        alias: result.agent.alias.clone(),
    });

    Ok(Json(InitResponse {
        project_id: tenant.project_id,
        project_slug: tenant.slug,
        agent_id: result.agent.agent_id,
        alias: result.agent.alias,
        api_key: result.api_key,
    }))
}
