use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the diagnostic library.
///
/// Transport failures of individual probes are not errors: they are
/// classified into result objects. Only input problems and failures of the
/// surrounding machinery end up here.
#[derive(Error, Debug)]
pub enum DiagError {
    #[error("{0}")]
    Validation(String),

    #[error("failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    #[error("{message}")]
    Command {
        message: String,
        output: String,
        hint: Option<String>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DiagError>;

impl DiagError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DiagError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            DiagError::Command {
                message,
                output,
                hint,
            } => json!({ "error": message, "output": output, "hint": hint }),
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
