//! Domain error taxonomy (spec §7) and its single HTTP boundary mapping.

use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AwebError {
    #[error("authentication required")]
    AuthRequired,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("recipient is retired")]
    Gone { successor_alias: Option<String> },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type AwebResult<T> = Result<T, AwebError>;

impl AwebError {
    fn status(&self) -> Status {
        match self {
            AwebError::AuthRequired | AwebError::InvalidCredentials => Status::Unauthorized,
            AwebError::Forbidden(_) => Status::Forbidden,
            AwebError::NotFound(_) => Status::NotFound,
            AwebError::Gone { .. } => Status::Gone,
            AwebError::Conflict(_) => Status::Conflict,
            AwebError::Validation(_) => Status::UnprocessableEntity,
            AwebError::BadRequest(_) => Status::BadRequest,
            AwebError::DependencyUnavailable(_) => Status::InternalServerError,
            AwebError::Internal(_) => Status::InternalServerError,
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            AwebError::Gone { successor_alias } => json!({
                "detail": self.to_string(),
                "successor_alias": successor_alias,
            }),
            other => json!({ "detail": other.to_string() }),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for AwebError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        if matches!(self, AwebError::Internal(_) | AwebError::DependencyUnavailable(_)) {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let status = self.status();
        let body = Json(self.body());
        Response::build_from(body.respond_to(req)?)
            .status(status)
            .ok()
    }
}
