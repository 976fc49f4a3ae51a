//! Tenant API.
//!
//! Every endpoint requires a signed identity (see [`extractors::Authenticated`])
//! and only ever sees data of the caller's tenant.
//!
//! # Endpoints
//!
//! - `POST /orders`                            - create and price an order
//! - `GET  /orders/{order_id}`                 - fetch an order
//! - `POST /orders/{order_id}/status`          - move an order through its lifecycle
//! - `POST /orders/{order_id}/cancel`          - cancel an order
//! - `POST /orders/{order_id}/tip`             - change the tip
//! - `POST /orders/{order_id}/payments`        - start a payment attempt
//! - `GET  /payments/{payment_id}`             - fetch a payment attempt
//! - `POST /payments/{payment_id}/retry`       - retry a failed attempt
//! - `POST /payments/{payment_id}/cancel`      - cancel an attempt
//! - `POST /payments/{payment_id}/cash-received` - confirm a cash payment
//! - `GET  /events`                            - WebSocket event stream

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

mod error;
mod extractors;
mod orders;
mod payments;
mod ws;

pub use error::ApiError;

/// Build the tenant API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", post(orders::create_order))
        .route("/orders/{order_id}", get(orders::get_order))
        .route("/orders/{order_id}/status", post(orders::update_status))
        .route("/orders/{order_id}/cancel", post(orders::cancel_order))
        .route("/orders/{order_id}/tip", post(orders::update_tip))
        .route("/orders/{order_id}/payments", post(payments::start_payment))
        .route("/payments/{payment_id}", get(payments::get_payment))
        .route("/payments/{payment_id}/retry", post(payments::retry_payment))
        .route("/payments/{payment_id}/cancel", post(payments::cancel_payment))
        .route(
            "/payments/{payment_id}/cash-received",
            post(payments::confirm_cash),
        )
        .route("/events", get(ws::event_stream))
}
