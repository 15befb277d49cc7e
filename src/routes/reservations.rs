//! `POST /v1/reservations`, `/renew`, `/release`, `/revoke`, `GET /v1/reservations?prefix=`.

use rocket::serde::json::Json;
use rocket::{get, post, State};

use crate::auth::AuthContext;
use crate::db::Db;
use crate::error::AwebError;
use crate::events::{AwebEvent, EventBus};
use crate::models::{Reservation, ReservationAcquireRequest, ReservationKeyRequest, ReservationRenewRequest, ReservationRevokeRequest};
use crate::reservations::{self, AcquireOutcome, ReleaseOutcome, RenewOutcome};

#[post("/reservations", data = "<req>")]
pub fn acquire_reservation(
    db: &State<Db>,
    events: &State<EventBus>,
    auth: AuthContext,
    req: Json<ReservationAcquireRequest>,
) -> Result<Json<Reservation>, AwebError> {
    let agent_id = auth.require_agent()?;
    let req = req.into_inner();
    let conn = db.conn.lock().unwrap();

    match reservations::acquire(&conn, &auth.project_id, agent_id, &req.resource_key, req.ttl_seconds, req.metadata)? {
        AcquireOutcome::Acquired(reservation) => {
            events.publish(AwebEvent::ReservationAcquired {
                project_id: auth.project_id.clone(),
                resource_key: reservation.resource_key.clone(),
                holder_agent_id: reservation.holder_agent_id.clone(),
            });
            Ok(Json(reservation))
        }
        AcquireOutcome::Conflict { holder_agent_id, holder_alias, expires_at } => Err(AwebError::Conflict(format!(
            "resource held by {holder_alias} ({holder_agent_id}) until {expires_at}"
        ))),
    }
}

#[post("/reservations/renew", data = "<req>")]
pub fn renew_reservation(
    db: &State<Db>,
    auth: AuthContext,
    req: Json<ReservationRenewRequest>,
) -> Result<Json<serde_json::Value>, AwebError> {
    let agent_id = auth.require_agent()?;
    let req = req.into_inner();
    let conn = db.conn.lock().unwrap();

    match reservations::renew(&conn, &auth.project_id, agent_id, &req.resource_key, req.ttl_seconds)? {
        RenewOutcome::Renewed { expires_at } => Ok(Json(serde_json::json!({ "expires_at": expires_at }))),
        RenewOutcome::NotFound => Err(AwebError::NotFound("reservation not found".to_string())),
        RenewOutcome::NotOwner => Err(AwebError::Forbidden("reservation held by another agent".to_string())),
    }
}

#[post("/reservations/release", data = "<req>")]
pub fn release_reservation(
    db: &State<Db>,
    events: &State<EventBus>,
    auth: AuthContext,
    req: Json<ReservationKeyRequest>,
) -> Result<Json<serde_json::Value>, AwebError> {
    let agent_id = auth.require_agent()?;
    let req = req.into_inner();
    let conn = db.conn.lock().unwrap();

    match reservations::release(&conn, &auth.project_id, agent_id, &req.resource_key)? {
        ReleaseOutcome::Released { deleted } => {
            if deleted {
                events.publish(AwebEvent::ReservationReleased {
                    project_id: auth.project_id.clone(),
                    resource_key: req.resource_key.clone(),
                });
            }
            Ok(Json(serde_json::json!({ "released": true, "deleted": deleted })))
        }
        ReleaseOutcome::Conflict => Err(AwebError::Conflict("reservation held by another agent".to_string())),
    }
}

#[post("/reservations/revoke", data = "<req>")]
pub fn revoke_reservations(
    db: &State<Db>,
    auth: AuthContext,
    req: Json<ReservationRevokeRequest>,
) -> Result<Json<serde_json::Value>, AwebError> {
    let conn = db.conn.lock().unwrap();
    let deleted = reservations::revoke(&conn, &auth.project_id, req.prefix.as_deref())?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

#[get("/reservations?<prefix>")]
pub fn list_reservations(db: &State<Db>, auth: AuthContext, prefix: Option<&str>) -> Result<Json<Vec<Reservation>>, AwebError> {
    let conn = db.conn.lock().unwrap();
    let list = reservations::list(&conn, &auth.project_id, prefix)?;
    Ok(Json(list))
}
