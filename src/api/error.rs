//! Error types and conversions for the API layer.
//!
//! Engine errors are typed; this module maps each kind onto an HTTP status
//! and a consistent JSON body of shape
//! `{ "error": { "code": <code>, "message"?: <message>, "errors"?: <validation> } }`.

use crate::engine::{AddError, CancelError, ModifyError};
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_valid::ValidationRejection;
use http::StatusCode;
use tracing::{enabled, error, Level};
use validify::ValidationErrors;

/// Machine-readable error code used in API responses.
pub type Code = String;
/// Human-readable error message used in API responses.
pub type Message = String;

#[derive(Debug)]
pub enum Error {
    /// Resource not found. Returns 404.
    NotFound(Code, Message),
    /// Client error. Returns 400.
    BadRequest(Code, Message),
    /// Field-level validation failures. Returns 400 with a structured payload.
    Validation(ValidationErrors),
    /// Unexpected internal error. Returns 500.
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

/// Body-extraction failures from the `Validified` extractor: field-level rule
/// violations keep their structured payload, malformed JSON becomes a plain
/// bad request.
impl From<ValidationRejection<ValidationErrors, JsonRejection>> for Error {
    fn from(value: ValidationRejection<ValidationErrors, JsonRejection>) -> Self {
        match value {
            ValidationRejection::Valid(errors) => Error::Validation(errors),
            ValidationRejection::Inner(rejection) => {
                Error::BadRequest("INVALID_JSON".into(), rejection.body_text())
            }
        }
    }
}

impl From<AddError> for Error {
    fn from(value: AddError) -> Self {
        match value {
            AddError::DuplicateId(id) => Error::BadRequest(
                "DUPLICATE_ORDER_ID".into(),
                format!("order with id {id} is already resident"),
            ),
            AddError::InvalidOrder(reason) => Error::BadRequest("INVALID_ORDER".into(), reason),
            AddError::RiskRejected(violation) => {
                Error::BadRequest("RISK_REJECTED".into(), violation.to_string())
            }
            AddError::InsufficientLiquidity {
                required,
                available,
            } => Error::BadRequest(
                "INSUFFICIENT_LIQUIDITY".into(),
                format!("fill-or-kill order needs {required} but only {available} can trade"),
            ),
            err @ (AddError::Invariant(_) | AddError::Halted) => Error::Internal(Box::new(err)),
        }
    }
}

impl From<CancelError> for Error {
    fn from(value: CancelError) -> Self {
        match value {
            CancelError::NotFound(id) => {
                Error::NotFound("ORDER_NOT_FOUND".into(), format!("order {id} not found"))
            }
            err @ CancelError::Halted => Error::Internal(Box::new(err)),
        }
    }
}

impl From<ModifyError> for Error {
    fn from(value: ModifyError) -> Self {
        match value {
            ModifyError::NotFound(id) => {
                Error::NotFound("ORDER_NOT_FOUND".into(), format!("order {id} not found"))
            }
            ModifyError::InvalidModify(reason) => {
                Error::BadRequest("INVALID_MODIFY".into(), reason)
            }
            ModifyError::RiskRejected(violation) => {
                Error::BadRequest("RISK_REJECTED".into(), violation.to_string())
            }
            err @ (ModifyError::Invariant(_) | ModifyError::Halted) => {
                Error::Internal(Box::new(err))
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code, msg) = match self {
            Error::NotFound(code, msg) => (StatusCode::NOT_FOUND, code, msg),
            Error::BadRequest(code, msg) => (StatusCode::BAD_REQUEST, code, msg),
            Error::Validation(validation_errors) => {
                let body = Json(serde_json::json!({
                    "error": { "code": "VALIDATION_ERROR", "errors": validation_errors }
                }));

                return (StatusCode::BAD_REQUEST, body).into_response();
            }
            Error::Internal(err) => {
                error!("internal error: {}", err);

                let msg = if enabled!(Level::DEBUG) {
                    err.to_string()
                } else {
                    "an internal error happened while processing your request".into()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR".into(), msg)
            }
        };

        let body = Json(serde_json::json!({
            "error": { "code": code, "message": msg }
        }));

        (status, body).into_response()
    }
}
