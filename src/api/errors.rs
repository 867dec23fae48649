use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::engine::{CoreError, ErrorKind};

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// `configuration`, `protocol` or `concurrency` for engine errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Dashboard API error, rendered as a JSON body with a matching status code.
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    /// The request collides with the live run.
    Conflict(String),
    Engine(CoreError),
    Internal(anyhow::Error),
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Configuration => "configuration",
        ErrorKind::Protocol => "protocol",
        ErrorKind::Concurrency => "concurrency",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body): (StatusCode, ErrorResponse) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.into()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.into()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.into()),
            AppError::Engine(err) => {
                let status = match &err {
                    CoreError::NoActiveRun | CoreError::UnknownCase(_) => StatusCode::NOT_FOUND,
                    _ => match err.kind() {
                        ErrorKind::Configuration => StatusCode::UNPROCESSABLE_ENTITY,
                        ErrorKind::Protocol | ErrorKind::Concurrency => StatusCode::CONFLICT,
                    },
                };
                (
                    status,
                    ErrorResponse {
                        error: err.to_string(),
                        kind: Some(kind_label(err.kind())),
                        details: None,
                    },
                )
            }
            AppError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: "Internal server error".to_string(),
                    kind: None,
                    details: Some(format!("{:#}", err)),
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl From<String> for ErrorResponse {
    fn from(error: String) -> Self {
        Self {
            error,
            kind: None,
            details: None,
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::Engine(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}
