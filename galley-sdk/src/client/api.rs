//! REST client for orders and payments.

use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use url::Url;
use uuid::Uuid;

use super::ClientError;
use crate::objects::{
    ApiErrorBody, CancelOrderRequest, CreateOrderRequest, OrderResponse, OrderStatus,
    PaymentResponse, StartPaymentRequest, UpdateStatusRequest, UpdateTipRequest,
};
use crate::signature::{ACTOR_HEADER, SIGNATURE_HEADER, TENANT_HEADER, sign_identity};

/// Typed HTTP client for the Galley API.
///
/// Every request carries a freshly signed identity assertion for
/// `tenant_id` / `actor`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    tenant_id: Uuid,
    actor: String,
    secret: Vec<u8>,
}

impl ApiClient {
    pub fn new(
        base_url: Url,
        tenant_id: Uuid,
        actor: impl Into<String>,
        tenant_secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url,
            tenant_id,
            actor: actor.into(),
            secret: tenant_secret.into(),
        }
    }

    /// Replace the default `reqwest::Client` with a custom one.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    fn signed(&self, builder: RequestBuilder) -> RequestBuilder {
        let identity = sign_identity(self.tenant_id, &self.actor, &self.secret);
        builder
            .header(TENANT_HEADER, identity.tenant)
            .header(ACTOR_HEADER, identity.actor)
            .header(SIGNATURE_HEADER, identity.signature)
    }

    /// `POST /api/v1/orders`
    pub async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<OrderResponse, ClientError> {
        let url = self.base_url.join("/api/v1/orders")?;
        let resp = self.signed(self.http.post(url).json(request)).send().await?;
        parse_response(resp).await
    }

    /// `GET /api/v1/orders/{order_id}`
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderResponse, ClientError> {
        let url = self.base_url.join(&format!("/api/v1/orders/{order_id}"))?;
        let resp = self.signed(self.http.get(url)).send().await?;
        parse_response(resp).await
    }

    /// `POST /api/v1/orders/{order_id}/status`
    pub async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        expected_version: i64,
    ) -> Result<OrderResponse, ClientError> {
        let url = self
            .base_url
            .join(&format!("/api/v1/orders/{order_id}/status"))?;
        let body = UpdateStatusRequest {
            status,
            expected_version,
        };
        let resp = self.signed(self.http.post(url).json(&body)).send().await?;
        parse_response(resp).await
    }

    /// `POST /api/v1/orders/{order_id}/cancel`
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        expected_version: i64,
    ) -> Result<OrderResponse, ClientError> {
        let url = self
            .base_url
            .join(&format!("/api/v1/orders/{order_id}/cancel"))?;
        let body = CancelOrderRequest { expected_version };
        let resp = self.signed(self.http.post(url).json(&body)).send().await?;
        parse_response(resp).await
    }

    /// `POST /api/v1/orders/{order_id}/tip`
    pub async fn update_tip(
        &self,
        order_id: Uuid,
        tip: Decimal,
        expected_version: i64,
    ) -> Result<OrderResponse, ClientError> {
        let url = self.base_url.join(&format!("/api/v1/orders/{order_id}/tip"))?;
        let body = UpdateTipRequest {
            tip,
            expected_version,
        };
        let resp = self.signed(self.http.post(url).json(&body)).send().await?;
        parse_response(resp).await
    }

    /// `POST /api/v1/orders/{order_id}/payments`
    pub async fn start_payment(
        &self,
        order_id: Uuid,
        request: &StartPaymentRequest,
    ) -> Result<PaymentResponse, ClientError> {
        let url = self
            .base_url
            .join(&format!("/api/v1/orders/{order_id}/payments"))?;
        let resp = self.signed(self.http.post(url).json(request)).send().await?;
        parse_response(resp).await
    }

    /// `GET /api/v1/payments/{payment_id}`
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<PaymentResponse, ClientError> {
        let url = self
            .base_url
            .join(&format!("/api/v1/payments/{payment_id}"))?;
        let resp = self.signed(self.http.get(url)).send().await?;
        parse_response(resp).await
    }

    /// `POST /api/v1/payments/{payment_id}/retry`
    pub async fn retry_payment(&self, payment_id: Uuid) -> Result<PaymentResponse, ClientError> {
        self.payment_action(payment_id, "retry").await
    }

    /// `POST /api/v1/payments/{payment_id}/cancel`
    pub async fn cancel_payment(&self, payment_id: Uuid) -> Result<PaymentResponse, ClientError> {
        self.payment_action(payment_id, "cancel").await
    }

    /// `POST /api/v1/payments/{payment_id}/cash-received`
    pub async fn confirm_cash(&self, payment_id: Uuid) -> Result<PaymentResponse, ClientError> {
        self.payment_action(payment_id, "cash-received").await
    }

    async fn payment_action(
        &self,
        payment_id: Uuid,
        action: &str,
    ) -> Result<PaymentResponse, ClientError> {
        let url = self
            .base_url
            .join(&format!("/api/v1/payments/{payment_id}/{action}"))?;
        let resp = self.signed(self.http.post(url)).send().await?;
        parse_response(resp).await
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(body) => ClientError::Api { status, body },
            Err(_) => ClientError::Unstructured { status, body },
        });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(ClientError::Json)
}
