use crate::confirmation::ConfirmationError;
use crate::folders::FolderError;
use crate::gmail::MailboxError;
use crate::session::AuthRequired;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};

/// Application error types for tool endpoints.
///
/// Every variant renders as `{"status": "error", "error": ...}`.
#[derive(Debug)]
pub enum AppError {
    Unauthenticated(String),
    BadRequest(String),
    Confirmation(ConfirmationError),
    NotFound(String),
    /// A batch stopped at `message_id` after `completed` messages
    BatchAborted {
        error: String,
        message_id: String,
        completed: usize,
    },
    BadGateway(String),
    ServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, error_body(msg)),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, error_body(msg)),
            AppError::Confirmation(e) => {
                let mut body = error_body(e.to_string());
                if let ConfirmationError::ResourceMismatch {
                    token_resource,
                    requested_resource,
                } = &e
                {
                    body["details"] = json!({
                        "token_params": {"resource_id": token_resource},
                        "request_params": {"resource_id": requested_resource},
                    });
                }
                (StatusCode::BAD_REQUEST, body)
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, error_body(msg)),
            AppError::BatchAborted {
                error,
                message_id,
                completed,
            } => {
                let mut body = error_body(error);
                body["message_id"] = json!(message_id);
                body["completed"] = json!(completed);
                (StatusCode::BAD_GATEWAY, body)
            }
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, error_body(msg)),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(msg)),
        };

        (status, Json(body)).into_response()
    }
}

fn error_body(message: String) -> Value {
    json!({"status": "error", "error": message})
}

impl From<AuthRequired> for AppError {
    fn from(e: AuthRequired) -> Self {
        AppError::Unauthenticated(e.0)
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        AppError::BadRequest(e.body_text())
    }
}

impl From<ConfirmationError> for AppError {
    fn from(e: ConfirmationError) -> Self {
        AppError::Confirmation(e)
    }
}

impl From<MailboxError> for AppError {
    fn from(e: MailboxError) -> Self {
        match e {
            MailboxError::Decode(_) => AppError::ServerError(format!("Unexpected error: {}", e)),
            _ => AppError::BadGateway(e.to_string()),
        }
    }
}

impl From<FolderError> for AppError {
    fn from(e: FolderError) -> Self {
        match e {
            FolderError::UnknownFolder(_) => AppError::NotFound(e.to_string()),
            FolderError::NoMatchingLabels => AppError::BadRequest(e.to_string()),
            FolderError::Catalog(source) => AppError::from(source),
            FolderError::Message {
                ref message_id,
                completed,
                ..
            } => AppError::BatchAborted {
                error: e.to_string(),
                message_id: message_id.clone(),
                completed,
            },
        }
    }
}
