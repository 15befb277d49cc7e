//! `POST/GET/DELETE /v1/contacts`.

use rocket::serde::json::Json;
use rocket::{delete, get, post, State};

use crate::auth::AuthContext;
use crate::contacts;
use crate::db::Db;
use crate::error::AwebError;
use crate::models::{AddContactRequest, Contact};

#[post("/contacts", data = "<req>")]
pub fn add_contact(db: &State<Db>, auth: AuthContext, req: Json<AddContactRequest>) -> Result<Json<Contact>, AwebError> {
    let conn = db.conn.lock().unwrap();
    let contact = contacts::add_contact(&conn, &auth.project_id, &req.address, req.label.as_deref())?;
    Ok(Json(contact))
}

#[get("/contacts")]
pub fn list_contacts(db: &State<Db>, auth: AuthContext) -> Result<Json<Vec<Contact>>, AwebError> {
    let conn = db.conn.lock().unwrap();
    let contacts = contacts::list_contacts(&conn, &auth.project_id)?;
    Ok(Json(contacts))
}

#[delete("/contacts/<contact_id>")]
pub fn remove_contact(db: &State<Db>, auth: AuthContext, contact_id: &str) -> Result<Json<serde_json::Value>, AwebError> {
    let conn = db.conn.lock().unwrap();
    contacts::remove_contact(&conn, &auth.project_id, contact_id)?;
    Ok(Json(serde_json::json!({ "removed": true })))
}
