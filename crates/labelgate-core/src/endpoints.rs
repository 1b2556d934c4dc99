//! `POST /set-context` and `GET /get-context`, independent of any web framework.
//!
//! Adapters decode the raw request body, call into this module and serialise the
//! returned [`EndpointReply`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::StatusCode;
use crate::label::{LabelHandle, DEFAULT_FEATURE};

pub const SET_CONTEXT_PATH: &str = "/set-context";
pub const GET_CONTEXT_PATH: &str = "/get-context";

/// How failures of `POST /set-context` are reported on the wire.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorStatusPolicy {
    /// Always answer 200; failures only show up in the payload.
    #[default]
    AlwaysOk,
    /// 400 for malformed input, 500 for storage failures.
    Strict,
}

impl ErrorStatusPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            Self::Strict
        } else {
            Self::AlwaysOk
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Success,
    Error,
}

/// Body of every `POST /set-context` response.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SetContextReply {
    pub status: ReplyStatus,
    pub message: String,
}

/// Body of every `GET /get-context` response.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct GetContextReply {
    pub active_feature: String,
}

/// Status code plus JSON body, ready for an adapter to send.
#[derive(Clone, Debug)]
pub struct EndpointReply {
    pub status: StatusCode,
    pub body: Bytes,
}

impl EndpointReply {
    fn json<T: Serialize>(status: StatusCode, payload: &T) -> Self {
        let body = serde_json::to_vec(payload).map(Bytes::from).unwrap_or_else(|err| {
            log::error!("failed to serialise endpoint reply: {err}");
            Bytes::from_static(b"{}")
        });
        Self { status, body }
    }
}

#[derive(Debug, thiserror::Error)]
enum SetContextError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("'feature' must be a string, got {0}")]
    FeatureNotString(Value),
    #[error("{0}")]
    Store(#[from] crate::label::LabelError),
}

impl SetContextError {
    fn status(&self) -> StatusCode {
        match self {
            SetContextError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Extract the requested label from a raw body. A missing `feature` key means [`DEFAULT_FEATURE`].
fn requested_feature(body: &[u8]) -> Result<String, SetContextError> {
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(mut map) => match map.remove("feature") {
            None => Ok(DEFAULT_FEATURE.to_string()),
            Some(Value::String(feature)) => Ok(feature),
            Some(other) => Err(SetContextError::FeatureNotString(other)),
        },
        _ => Err(SetContextError::NotAnObject),
    }
}

async fn apply_set_context(labels: &LabelHandle, body: &[u8]) -> Result<String, SetContextError> {
    let feature = requested_feature(body)?;
    labels.write(&feature).await?;
    Ok(feature)
}

/// Handle `POST /set-context`. Never fails; errors become an error-shaped payload.
pub async fn set_context(
    labels: &LabelHandle,
    body: &[u8],
    policy: ErrorStatusPolicy,
) -> EndpointReply {
    match apply_set_context(labels, body).await {
        Ok(feature) => {
            log::info!("active feature set to {:?}", feature);
            EndpointReply::json(
                StatusCode::OK,
                &SetContextReply {
                    status: ReplyStatus::Success,
                    message: format!("Context updated to '{feature}'."),
                },
            )
        }
        Err(err) => {
            log::warn!("set-context rejected: {err}");
            let status = match policy {
                ErrorStatusPolicy::AlwaysOk => StatusCode::OK,
                ErrorStatusPolicy::Strict => err.status(),
            };
            EndpointReply::json(
                status,
                &SetContextReply {
                    status: ReplyStatus::Error,
                    message: err.to_string(),
                },
            )
        }
    }
}

/// Handle `GET /get-context`.
pub async fn get_context(labels: &LabelHandle) -> EndpointReply {
    EndpointReply::json(
        StatusCode::OK,
        &GetContextReply {
            active_feature: labels.read().await,
        },
    )
}
