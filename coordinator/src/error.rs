use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;
use thiserror::Error;

/// Stable error taxonomy for every coordinator operation (registry, binary
/// control, EPS planning, metrics, reset). Each variant maps to exactly one
/// HTTP status code, so handlers never have to pick a code themselves.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("node {0} is disabled")]
    NodeDisabled(String),

    #[error("{kind} already running on {node} (pid {pid})")]
    AlreadyRunning {
        node: String,
        kind: String,
        pid: u32,
    },

    #[error("{kind} not running on {node}")]
    NotRunning { node: String, kind: String },

    #[error("remote command failed on {node}: {message}\nstdout: {stdout}\nstderr: {stderr}")]
    RemoteExecFailed {
        node: String,
        message: String,
        stdout: String,
        stderr: String,
    },

    #[error("failed to parse {0}")]
    ParseFailed(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    fn status(&self) -> StatusCode {
        match self {
            CoordinatorError::NotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::Duplicate(_) => StatusCode::CONFLICT,
            CoordinatorError::NodeDisabled(_) => StatusCode::CONFLICT,
            CoordinatorError::AlreadyRunning { .. } => StatusCode::CONFLICT,
            CoordinatorError::NotRunning { .. } => StatusCode::CONFLICT,
            CoordinatorError::RemoteExecFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            CoordinatorError::ParseFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoordinatorError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoordinatorError::Validation(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::Conflict(_) => StatusCode::CONFLICT,
            CoordinatorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The one envelope shape every handler in this service replies with.
#[derive(Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl Envelope<()> {
    pub fn ok(message: impl Into<String>) -> Self {
        Envelope {
            success: true,
            message: message.into(),
            data: None,
        }
    }
}

impl<T: Serialize> Envelope<T> {
    pub fn ok_with(data: T) -> Self {
        Envelope {
            success: true,
            message: "ok".to_string(),
            data: Some(data),
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::error!(error = %self, status = %status, "request failed");

        let body = Json(Envelope::<()> {
            success: false,
            message: self.to_string(),
            data: None,
        });
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
