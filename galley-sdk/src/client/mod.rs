//! HTTP and WebSocket clients for the Galley API.
//!
//! Gated behind the `client` cargo feature so downstream crates that only
//! need the shared types do not pull in `reqwest` and `tokio-tungstenite`.

mod api;
mod events;

pub use api::ApiClient;
pub use events::{EventStream, StreamItem};

use reqwest::StatusCode;

use crate::objects::ApiErrorBody;
use crate::signature::SignatureError;

/// Errors produced by the SDK clients.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (DNS, TLS, connection reset, …).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Identity signature could not be computed or verified.
    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),

    /// The server returned a non-2xx status code with a structured body.
    #[error("api error: status {status}, {}: {}", body.error, body.message)]
    Api { status: StatusCode, body: ApiErrorBody },

    /// The server returned a non-2xx status code with an unstructured body.
    #[error("api error: status {status}, body: {body}")]
    Unstructured { status: StatusCode, body: String },

    /// Body could not be (de)serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The base URL could not be joined with the endpoint path.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// A header value contained characters HTTP does not allow.
    #[error("invalid header value")]
    InvalidHeader,
}

impl ClientError {
    /// The structured error body, if the server sent one.
    pub fn api_body(&self) -> Option<&ApiErrorBody> {
        match self {
            ClientError::Api { body, .. } => Some(body),
            _ => None,
        }
    }
}
