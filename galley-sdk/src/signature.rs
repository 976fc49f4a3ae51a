//! Identity assertions for the Galley API.
//!
//! Galley does not issue credentials. The upstream gateway that performed
//! authentication forwards the tenant and actor it established, signed with
//! the tenant's shared secret:
//!
//! ```text
//! Galley-Tenant:    {tenant_uuid}
//! Galley-Actor:     {actor}
//! Galley-Signature: {unix_timestamp}.{base64_signature}
//! ```
//!
//! The signature is `HMAC-SHA256("{tenant}.{actor}.{timestamp}", secret)`.

use uuid::Uuid;

/// Header name carrying the tenant id.
pub const TENANT_HEADER: &str = "Galley-Tenant";

/// Header name carrying the acting user or device.
pub const ACTOR_HEADER: &str = "Galley-Actor";

/// Header name for the HMAC signature.
pub const SIGNATURE_HEADER: &str = "Galley-Signature";

/// Maximum allowed age of a signature (in seconds).
pub const MAX_SIGNATURE_AGE: i64 = 5 * 60;

/// Tolerated clock skew for timestamps from the future (in seconds).
pub const MAX_CLOCK_SKEW: i64 = 30;

/// Errors produced by signature operations.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid header format")]
    InvalidFormat,
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("invalid signature")]
    SignatureMismatch,
    #[error("signature expired")]
    Expired,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

/// A signed identity assertion, ready to be sent as request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityHeaders {
    pub tenant: String,
    pub actor: String,
    pub signature: String,
}

fn identity_payload(tenant_id: Uuid, actor: &str, timestamp: i64) -> String {
    format!("{tenant_id}.{actor}.{timestamp}")
}

/// Sign an identity assertion with the current time.
pub fn sign_identity(tenant_id: Uuid, actor: &str, key: &[u8]) -> IdentityHeaders {
    let timestamp = time::OffsetDateTime::now_utc().unix_timestamp();
    sign_identity_at(tenant_id, actor, timestamp, key)
}

/// Sign an identity assertion with an explicit timestamp.
pub fn sign_identity_at(
    tenant_id: Uuid,
    actor: &str,
    timestamp: i64,
    key: &[u8],
) -> IdentityHeaders {
    let data = identity_payload(tenant_id, actor, timestamp);
    let sig = ring::hmac::sign(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
        data.as_bytes(),
    );
    IdentityHeaders {
        tenant: tenant_id.to_string(),
        actor: actor.to_owned(),
        signature: format_signature_header(timestamp, sig.as_ref()),
    }
}

/// Verify an identity assertion's HMAC and timestamp freshness.
pub fn verify_identity(
    tenant_id: Uuid,
    actor: &str,
    timestamp: i64,
    signature: &[u8],
    key: &[u8],
) -> Result<(), SignatureError> {
    let data = identity_payload(tenant_id, actor, timestamp);
    ring::hmac::verify(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
        data.as_bytes(),
        signature,
    )?;
    check_timestamp(timestamp)?;
    Ok(())
}

/// Parse a `Galley-Signature` header value (`{timestamp}.{base64}`) into
/// `(timestamp, raw_signature_bytes)`.
pub fn parse_signature_header(value: &str) -> Result<(i64, Box<[u8]>), SignatureError> {
    let (timestamp, encoded) = value.split_once('.').ok_or(SignatureError::InvalidFormat)?;
    let timestamp: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidFormat)?;
    let signature_bytes = fast32::base64::RFC4648_NOPAD
        .decode_str(encoded)
        .map_err(|_| SignatureError::InvalidBase64)?
        .into_boxed_slice();
    Ok((timestamp, signature_bytes))
}

/// Format a `{timestamp}.{base64}` header value from its parts.
pub fn format_signature_header(timestamp: i64, signature: &[u8]) -> String {
    format!(
        "{}.{}",
        timestamp,
        fast32::base64::RFC4648_NOPAD.encode(signature)
    )
}

/// Check that a signature timestamp is neither older than
/// [`MAX_SIGNATURE_AGE`] nor further in the future than [`MAX_CLOCK_SKEW`].
pub fn check_timestamp(timestamp: i64) -> Result<(), SignatureError> {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    if now - timestamp > MAX_SIGNATURE_AGE || timestamp - now > MAX_CLOCK_SKEW {
        return Err(SignatureError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"tenant-secret";

    #[test]
    fn test_signed_identity_verifies() {
        let tenant = Uuid::now_v7();
        let headers = sign_identity(tenant, "waiter-7", KEY);
        let (timestamp, sig) = parse_signature_header(&headers.signature).unwrap();
        verify_identity(tenant, "waiter-7", timestamp, &sig, KEY).unwrap();
    }

    #[test]
    fn test_actor_and_tenant_are_bound() {
        let tenant = Uuid::now_v7();
        let headers = sign_identity(tenant, "waiter-7", KEY);
        let (timestamp, sig) = parse_signature_header(&headers.signature).unwrap();

        let other_actor = verify_identity(tenant, "manager", timestamp, &sig, KEY);
        assert!(matches!(other_actor, Err(SignatureError::SignatureMismatch)));

        let other_tenant = verify_identity(Uuid::now_v7(), "waiter-7", timestamp, &sig, KEY);
        assert!(matches!(other_tenant, Err(SignatureError::SignatureMismatch)));

        let other_key = verify_identity(tenant, "waiter-7", timestamp, &sig, b"other");
        assert!(matches!(other_key, Err(SignatureError::SignatureMismatch)));
    }

    #[test]
    fn test_stale_signature_rejected() {
        let tenant = Uuid::now_v7();
        let old = time::OffsetDateTime::now_utc().unix_timestamp() - MAX_SIGNATURE_AGE - 10;
        let headers = sign_identity_at(tenant, "kds-1", old, KEY);
        let (timestamp, sig) = parse_signature_header(&headers.signature).unwrap();
        assert!(matches!(
            verify_identity(tenant, "kds-1", timestamp, &sig, KEY),
            Err(SignatureError::Expired)
        ));
    }

    #[test]
    fn test_malformed_header() {
        assert!(matches!(
            parse_signature_header("no-dot"),
            Err(SignatureError::InvalidFormat)
        ));
        assert!(matches!(
            parse_signature_header("abc.AAAA"),
            Err(SignatureError::InvalidFormat)
        ));
        assert!(matches!(
            parse_signature_header("123.!!!"),
            Err(SignatureError::InvalidBase64)
        ));
    }
}
