//! Error taxonomy for the site registry and JSON error responses for the API

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Errors surfaced by site admission, deletion and persistence
#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    /// A site definition failed validation; registry state is unchanged
    #[error("{0}")]
    Validation(String),

    /// The immediate clone requested at admission time failed
    #[error("Unable to clone repo.")]
    Clone,

    /// The supplied delete password did not match the stored one
    #[error("Password does not match.")]
    PasswordMismatch,

    /// A git command failed during synchronization
    #[error("git: {0}")]
    Git(String),

    /// Reading or writing the registry snapshot failed
    #[error("persistence error: {0}")]
    Io(#[from] std::io::Error),

    /// The registry snapshot could not be encoded or decoded
    #[error("invalid registry snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

impl SiteError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SiteError::Validation(msg.into())
    }

    /// HTTP status used when this error is reported through the API
    pub fn status_code(&self) -> StatusCode {
        match self {
            SiteError::Validation(_) | SiteError::Clone | SiteError::PasswordMismatch => {
                StatusCode::BAD_REQUEST
            }
            SiteError::Git(_) | SiteError::Io(_) | SiteError::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub type Result<T, E = SiteError> = std::result::Result<T, E>;

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"{}"}}"#,
                self.error.replace('\\', "\\\\").replace('"', "\\\"")
            )
        })
    }
}

/// Build a `{"error": msg}` response with the given status
pub fn json_error_response(
    status: StatusCode,
    message: impl Into<String>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let body = ErrorResponse::new(message).to_json();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}

/// Report a `SiteError` through the API
pub fn site_error_response(err: &SiteError) -> Response<BoxBody<Bytes, hyper::Error>> {
    json_error_response(err.status_code(), err.to_string())
}
