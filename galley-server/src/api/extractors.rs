//! Identity extraction for tenant-scoped endpoints.
//!
//! Galley trusts the upstream gateway to authenticate callers. What it
//! verifies here is that the forwarded identity headers were signed with
//! the tenant's shared secret. All cryptographic operations are delegated
//! to [`galley_sdk::signature`].

use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use galley_core::entities::{Actor, AuthContext, Identity, TenantId};
use galley_sdk::objects::ApiErrorBody;
use galley_sdk::signature::{
    self, ACTOR_HEADER, SIGNATURE_HEADER, SignatureError, TENANT_HEADER,
};
use uuid::Uuid;

use crate::state::AppState;

/// A caller whose tenant and actor headers carry a valid signature.
///
/// # Header format
///
/// ```text
/// Galley-Tenant:    {tenant_uuid}
/// Galley-Actor:     {actor}
/// Galley-Signature: {unix_timestamp}.{base64_signature}
/// ```
pub struct Authenticated(pub Identity);

impl Authenticated {
    pub fn auth_context(&self) -> AuthContext {
        AuthContext::Authenticated(self.0.clone())
    }
}

/// Errors returned by the [`Authenticated`] extractor.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("invalid {0} header")]
    InvalidHeader(&'static str),
    #[error("invalid signature encoding")]
    InvalidBase64,
    #[error("unknown tenant")]
    UnknownTenant,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("signature expired")]
    Expired,
}

impl From<SignatureError> for IdentityError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::InvalidFormat => Self::InvalidHeader(SIGNATURE_HEADER),
            SignatureError::InvalidBase64 => Self::InvalidBase64,
            SignatureError::SignatureMismatch => Self::VerificationFailed,
            SignatureError::Expired => Self::Expired,
        }
    }
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            IdentityError::MissingHeader(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            IdentityError::InvalidHeader(_) | IdentityError::InvalidBase64 => {
                (StatusCode::BAD_REQUEST, "invalid_identity_header")
            }
            IdentityError::UnknownTenant => (StatusCode::UNAUTHORIZED, "unknown_tenant"),
            IdentityError::VerificationFailed | IdentityError::Expired => {
                (StatusCode::UNAUTHORIZED, "invalid_signature")
            }
        };
        tracing::debug!(error = %self, "Rejected identity assertion");
        (status, Json(ApiErrorBody::new(code, self.to_string()))).into_response()
    }
}

fn header<'a>(parts: &'a Parts, name: &'static str) -> Result<&'a str, IdentityError> {
    parts
        .headers
        .get(name)
        .ok_or(IdentityError::MissingHeader(name))?
        .to_str()
        .map_err(|_| IdentityError::InvalidHeader(name))
}

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = IdentityError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let tenant: Uuid = header(parts, TENANT_HEADER)?
            .parse()
            .map_err(|_| IdentityError::InvalidHeader(TENANT_HEADER))?;
        let actor = header(parts, ACTOR_HEADER)?.trim();
        if actor.is_empty() {
            return Err(IdentityError::InvalidHeader(ACTOR_HEADER));
        }
        let (timestamp, signature_bytes) =
            signature::parse_signature_header(header(parts, SIGNATURE_HEADER)?)?;

        let tenants = state.tenants.current();
        let tenant_config = tenants
            .get(TenantId(tenant))
            .ok_or(IdentityError::UnknownTenant)?;
        signature::verify_identity(
            tenant,
            actor,
            timestamp,
            &signature_bytes,
            tenant_config.secret_bytes(),
        )?;

        Ok(Authenticated(Identity::new(TenantId(tenant), Actor::new(actor))))
    }
}
