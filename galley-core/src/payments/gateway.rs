//! The payment gateway seam and its HTTP implementation.
//!
//! Every error leaving this module is already classified into a
//! [`FailureKind`], which decides whether the driver may retry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::entities::OrderId;
use crate::entities::payment::{FailureKind, GatewayOperation, PaymentFailure};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct GatewayError {
    pub kind: FailureKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timed_out(operation: GatewayOperation, after: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("{operation} timed out after {}s", after.as_secs()),
        )
    }

    pub fn retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn to_failure(&self) -> PaymentFailure {
        PaymentFailure::new(self.kind, self.message.clone())
    }
}

impl From<&PaymentFailure> for GatewayError {
    fn from(failure: &PaymentFailure) -> Self {
        Self::new(failure.kind, failure.message.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeRequest {
    pub idempotency_key: String,
    pub order_id: OrderId,
    pub amount: Decimal,
    pub source_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCheckoutRequest {
    pub idempotency_key: String,
    pub order_id: OrderId,
    pub amount: Decimal,
    pub device_id: String,
}

/// Progress of a checkout running on a payment terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Waiting for the guest to present a card.
    Waiting,
    CardPresented,
    Processing,
    Approved,
    Declined { reason: String },
    /// The device gave up (guest cancelled, connection lost, ...).
    Failed { reason: String },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Place an authorization hold. Returns the gateway reference.
    async fn authorize(&self, request: &AuthorizeRequest) -> Result<String, GatewayError>;

    async fn capture(
        &self,
        reference: &str,
        idempotency_key: &str,
        amount: Decimal,
    ) -> Result<(), GatewayError>;

    /// Void an authorization or abort a device checkout.
    async fn cancel(&self, reference: &str) -> Result<(), GatewayError>;

    /// Hand the checkout to a terminal. Returns the checkout reference.
    async fn start_device_checkout(
        &self,
        request: &DeviceCheckoutRequest,
    ) -> Result<String, GatewayError>;

    async fn device_status(&self, reference: &str) -> Result<DeviceStatus, GatewayError>;
}

/// Map an HTTP status from the gateway to a failure kind.
pub fn classify_status(status: StatusCode) -> FailureKind {
    match status {
        StatusCode::PAYMENT_REQUIRED => FailureKind::Declined,
        StatusCode::CONFLICT => FailureKind::Rejected,
        StatusCode::TOO_MANY_REQUESTS => FailureKind::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => FailureKind::Timeout,
        s if s.is_server_error() => FailureKind::Unavailable,
        _ => FailureKind::InvalidRequest,
    }
}

fn classify_transport(error: &reqwest::Error) -> FailureKind {
    if error.is_timeout() {
        FailureKind::Timeout
    } else if error.is_connect() || error.is_request() {
        FailureKind::Network
    } else if error.is_decode() {
        FailureKind::Unavailable
    } else {
        FailureKind::Network
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        GatewayError::new(classify_transport(&error), error.to_string())
    }
}

#[derive(Serialize)]
struct AuthorizeBody<'a> {
    amount: Decimal,
    source: &'a str,
    reference_id: OrderId,
}

#[derive(Serialize)]
struct CaptureBody {
    amount: Decimal,
}

#[derive(Serialize)]
struct DeviceCheckoutBody<'a> {
    amount: Decimal,
    device_id: &'a str,
    reference_id: OrderId,
}

#[derive(Deserialize)]
struct CreatedResource {
    id: String,
}

#[derive(Deserialize)]
struct GatewayErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// REST client for the card gateway.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    http_client: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: Url, api_key: String) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url,
            api_key,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::new(FailureKind::InvalidRequest, e.to_string()))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GatewayErrorBody>(&text)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(text);
        Err(GatewayError::new(
            classify_status(status),
            format!("gateway returned {status}: {message}"),
        ))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn authorize(&self, request: &AuthorizeRequest) -> Result<String, GatewayError> {
        let response = self
            .http_client
            .post(self.endpoint("v1/authorizations")?)
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&AuthorizeBody {
                amount: request.amount,
                source: &request.source_token,
                reference_id: request.order_id,
            })
            .send()
            .await?;
        let created: CreatedResource = Self::check(response).await?.json().await?;
        Ok(created.id)
    }

    async fn capture(
        &self,
        reference: &str,
        idempotency_key: &str,
        amount: Decimal,
    ) -> Result<(), GatewayError> {
        let response = self
            .http_client
            .post(self.endpoint(&format!("v1/authorizations/{reference}/capture"))?)
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", format!("{idempotency_key}:capture"))
            .json(&CaptureBody { amount })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn cancel(&self, reference: &str) -> Result<(), GatewayError> {
        let response = self
            .http_client
            .post(self.endpoint(&format!("v1/payments/{reference}/cancel"))?)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn start_device_checkout(
        &self,
        request: &DeviceCheckoutRequest,
    ) -> Result<String, GatewayError> {
        let response = self
            .http_client
            .post(self.endpoint("v1/terminal/checkouts")?)
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&DeviceCheckoutBody {
                amount: request.amount,
                device_id: &request.device_id,
                reference_id: request.order_id,
            })
            .send()
            .await?;
        let created: CreatedResource = Self::check(response).await?.json().await?;
        Ok(created.id)
    }

    async fn device_status(&self, reference: &str) -> Result<DeviceStatus, GatewayError> {
        let response = self
            .http_client
            .get(self.endpoint(&format!("v1/terminal/checkouts/{reference}"))?)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(StatusCode::PAYMENT_REQUIRED), FailureKind::Declined);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), FailureKind::RateLimited);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), FailureKind::Unavailable);
        assert_eq!(classify_status(StatusCode::UNPROCESSABLE_ENTITY), FailureKind::InvalidRequest);
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE).is_retryable());
        assert!(!classify_status(StatusCode::CONFLICT).is_retryable());
    }

    #[test]
    fn test_device_status_wire_format() {
        let status: DeviceStatus =
            serde_json::from_str(r#"{"status":"declined","reason":"card expired"}"#).unwrap();
        assert_eq!(
            status,
            DeviceStatus::Declined {
                reason: "card expired".into()
            }
        );
        let status: DeviceStatus = serde_json::from_str(r#"{"status":"card_presented"}"#).unwrap();
        assert_eq!(status, DeviceStatus::CardPresented);
    }
}
