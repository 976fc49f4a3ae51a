//! Mapping of engine errors onto HTTP responses.
//!
//! Every rejection carries a JSON [`ApiErrorBody`] that says why the request
//! failed and, where one exists, what the caller can still do.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use galley_core::error::{AuthError, EngineError, ResourceKind};
use galley_sdk::objects::ApiErrorBody;

/// Error type returned by every API handler.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        Self(error)
    }
}

fn status_and_body(error: &EngineError) -> (StatusCode, ApiErrorBody) {
    let message = error.to_string();
    match error {
        EngineError::Validation(_) => (
            StatusCode::BAD_REQUEST,
            ApiErrorBody::new("validation_error", message),
        ),
        EngineError::InvalidTransition(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorBody {
                current_status: Some(e.current.into()),
                valid_next_states: Some(e.valid_next.iter().map(|s| (*s).into()).collect()),
                ..ApiErrorBody::new("invalid_transition", message)
            },
        ),
        EngineError::PaymentRejected(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorBody {
                current_state: Some(e.state.into()),
                ..ApiErrorBody::new("payment_transition_rejected", message)
            },
        ),
        EngineError::Conflict { current, .. } => (
            StatusCode::CONFLICT,
            ApiErrorBody {
                current_version: Some(*current),
                ..ApiErrorBody::new("version_conflict", message)
            },
        ),
        EngineError::PaymentInProgress { payment_id } => (
            StatusCode::CONFLICT,
            ApiErrorBody {
                payment_id: payment_id.map(|id| id.0),
                ..ApiErrorBody::new("payment_in_progress", message)
            },
        ),
        EngineError::Auth(AuthError::TenantMismatch { .. }) => (
            StatusCode::FORBIDDEN,
            ApiErrorBody::new("tenant_mismatch", message),
        ),
        EngineError::Auth(AuthError::Anonymous) => (
            StatusCode::UNAUTHORIZED,
            ApiErrorBody::new("unauthenticated", message),
        ),
        EngineError::Auth(AuthError::UnknownTenant(_)) => (
            StatusCode::UNAUTHORIZED,
            ApiErrorBody::new("unknown_tenant", message),
        ),
        EngineError::ExternalGateway { payment_id, error } => (
            StatusCode::BAD_GATEWAY,
            ApiErrorBody {
                retryable: Some(error.retryable()),
                payment_id: payment_id.map(|id| id.0),
                ..ApiErrorBody::new("gateway_error", message)
            },
        ),
        EngineError::NotFound(ResourceKind::Order) => (
            StatusCode::NOT_FOUND,
            ApiErrorBody::new("order_not_found", message),
        ),
        EngineError::NotFound(ResourceKind::Payment) => (
            StatusCode::NOT_FOUND,
            ApiErrorBody::new("payment_not_found", message),
        ),
        EngineError::Storage(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiErrorBody::new("internal_error", "internal server error"),
        ),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = status_and_body(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "API request failed");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "API request rejected");
        }
        (status, Json(body)).into_response()
    }
}
