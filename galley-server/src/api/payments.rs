use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use galley_core::entities::{OrderId, PaymentId};
use galley_sdk::objects::{PaymentResponse, StartPaymentRequest};
use uuid::Uuid;

use super::ApiError;
use super::extractors::Authenticated;
use crate::state::AppState;

/// `POST /orders/{order_id}/payments`: start a payment attempt.
///
/// Card payments run to completion within the request. Terminal payments
/// return once the device checkout is created; progress follows on the
/// event stream.
pub(super) async fn start_payment(
    state: State<AppState>,
    Authenticated(identity): Authenticated,
    Path(order_id): Path<Uuid>,
    Json(body): Json<StartPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let attempt = state
        .service
        .start_payment(&identity, OrderId(order_id), body.into())
        .await?;
    Ok((StatusCode::CREATED, Json(attempt.to_response())))
}

/// `GET /payments/{payment_id}`
pub(super) async fn get_payment(
    state: State<AppState>,
    Authenticated(identity): Authenticated,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let attempt = state
        .service
        .get_payment(&identity, PaymentId(payment_id))
        .await?;
    Ok(Json(attempt.to_response()))
}

/// `POST /payments/{payment_id}/retry`: resume a failed attempt with its
/// original idempotency key.
pub(super) async fn retry_payment(
    state: State<AppState>,
    Authenticated(identity): Authenticated,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let attempt = state
        .service
        .retry_payment(&identity, PaymentId(payment_id))
        .await?;
    Ok(Json(attempt.to_response()))
}

/// `POST /payments/{payment_id}/cancel`
pub(super) async fn cancel_payment(
    state: State<AppState>,
    Authenticated(identity): Authenticated,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let attempt = state
        .service
        .cancel_payment(&identity, PaymentId(payment_id))
        .await?;
    Ok(Json(attempt.to_response()))
}

/// `POST /payments/{payment_id}/cash-received`
pub(super) async fn confirm_cash(
    state: State<AppState>,
    Authenticated(identity): Authenticated,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let attempt = state
        .service
        .confirm_cash(&identity, PaymentId(payment_id))
        .await?;
    Ok(Json(attempt.to_response()))
}
