use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use galley_core::entities::OrderId;
use galley_sdk::objects::{
    CancelOrderRequest, CreateOrderRequest, OrderResponse, UpdateStatusRequest, UpdateTipRequest,
};
use uuid::Uuid;

use super::ApiError;
use super::extractors::Authenticated;
use crate::state::AppState;

/// `POST /orders`: create an order priced from the tenant's menu.
pub(super) async fn create_order(
    state: State<AppState>,
    Authenticated(identity): Authenticated,
    Json(body): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.service.create_order(&identity, body).await?;
    Ok((StatusCode::CREATED, Json(order.to_response())))
}

/// `GET /orders/{order_id}`
pub(super) async fn get_order(
    state: State<AppState>,
    Authenticated(identity): Authenticated,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .service
        .get_order(&identity, OrderId(order_id))
        .await?;
    Ok(Json(order.to_response()))
}

/// `POST /orders/{order_id}/status`: request a lifecycle transition.
///
/// Rejected transitions answer 422 with the states the order can still
/// move to; a stale `expected_version` answers 409.
pub(super) async fn update_status(
    state: State<AppState>,
    Authenticated(identity): Authenticated,
    Path(order_id): Path<Uuid>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .service
        .update_status(
            &identity,
            OrderId(order_id),
            body.status.into(),
            body.expected_version,
        )
        .await?;
    Ok(Json(order.to_response()))
}

/// `POST /orders/{order_id}/cancel`
pub(super) async fn cancel_order(
    state: State<AppState>,
    Authenticated(identity): Authenticated,
    Path(order_id): Path<Uuid>,
    Json(body): Json<CancelOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .service
        .cancel_order(&identity, OrderId(order_id), body.expected_version)
        .await?;
    Ok(Json(order.to_response()))
}

/// `POST /orders/{order_id}/tip`
pub(super) async fn update_tip(
    state: State<AppState>,
    Authenticated(identity): Authenticated,
    Path(order_id): Path<Uuid>,
    Json(body): Json<UpdateTipRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .service
        .update_tip(&identity, OrderId(order_id), body.tip, body.expected_version)
        .await?;
    Ok(Json(order.to_response()))
}
