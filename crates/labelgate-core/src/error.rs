use anyhow::Error as AnyError;
use bytes::Bytes;
use serde_json::json;
use thiserror::Error;

use crate::http::StatusCode;

/// Gateway-level error that carries an HTTP status code.
#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("{message}")]
    BadRequest { message: String },
    #[error("no route matched path: {path}")]
    NotFound { path: String },
    #[error("upstream error: {message}")]
    Upstream { message: String },
    #[error("internal error: {source}")]
    Internal {
        #[from]
        source: AnyError,
    },
}

impl EdgeError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        EdgeError::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        EdgeError::NotFound { path: path.into() }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        EdgeError::Upstream {
            message: message.into(),
        }
    }

    pub fn internal<E>(error: E) -> Self
    where
        E: Into<AnyError>,
    {
        EdgeError::Internal {
            source: error.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            EdgeError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            EdgeError::NotFound { .. } => StatusCode::NOT_FOUND,
            EdgeError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            EdgeError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            EdgeError::BadRequest { message } => message.clone(),
            EdgeError::NotFound { path } => format!("no route matched path: {path}"),
            EdgeError::Upstream { message } => format!("upstream error: {message}"),
            EdgeError::Internal { source } => format!("internal error: {}", source),
        }
    }

    /// JSON error document served to clients: `{"error":{"status":..,"message":..}}`.
    pub fn to_json_body(&self) -> Bytes {
        let payload = json!({
            "error": {
                "status": self.status().as_u16(),
                "message": self.message(),
            }
        });
        serde_json::to_vec(&payload)
            .map(Bytes::from)
            .unwrap_or_else(|_| Bytes::from_static(b"{\"error\":{\"message\":\"internal error\"}}"))
    }
}
