//! HMAC-SHA256 signing for outbound webhook deliveries.
//!
//! The signed payload is `"{timestamp_millis}.{body}"` where `body` is the
//! canonical JSON string stored in the outbox row. Senders serialize once
//! and sign that exact byte string; receivers must verify against the raw
//! request body, not a re-serialization.

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signature timestamp before verification rejects it.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Allowance for receiver clocks running behind the sender.
const FUTURE_SKEW_SECS: i64 = 60;

/// Webhook secret size (256 bits).
const SECRET_BYTES: usize = 32;

/// Generate a fresh webhook signing secret: 256 bits of OS entropy,
/// hex-encoded with a recognizable prefix.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("whsec_{}", hex::encode(bytes))
}

/// Compute the signature for a delivery: lowercase hex
/// `HMAC-SHA256(secret, "{timestamp}.{body}")`.
///
/// `timestamp` is milliseconds since epoch rendered as a decimal string --
/// the same string that goes into the `X-Webhook-Timestamp` header.
pub fn sign(secret: &str, timestamp: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a signature in constant time, rejecting stale or future-dated
/// timestamps.
///
/// `now_millis` is the verifier's clock; timestamps older than
/// `tolerance_secs` or more than 60 s in the future fail verification.
pub fn verify(
    secret: &str,
    timestamp: &str,
    body: &str,
    signature: &str,
    now_millis: i64,
    tolerance_secs: i64,
) -> bool {
    let Ok(ts_millis) = timestamp.parse::<i64>() else {
        return false;
    };

    let age_secs = (now_millis - ts_millis) / 1000;
    if age_secs > tolerance_secs {
        tracing::warn!(
            "webhook signature rejected: timestamp too old (age={}s, max={}s)",
            age_secs,
            tolerance_secs
        );
        return false;
    }
    if age_secs < -FUTURE_SKEW_SECS {
        tracing::warn!(
            "webhook signature rejected: timestamp in the future (age={}s)",
            age_secs
        );
        return false;
    }

    let expected = sign(secret, timestamp, body);

    // Constant-time comparison so response timing leaks nothing about the
    // expected signature. Length is public (always 64 hex chars).
    let expected_bytes = expected.as_bytes();
    let provided_bytes = signature.as_bytes();
    if expected_bytes.len() != provided_bytes.len() {
        return false;
    }

    expected_bytes.ct_eq(provided_bytes).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_lowercase_hex() {
        let sig = sign("s", "1705315870000", r#"{"event":"payment.completed"}"#);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_signed_payload_is_timestamp_dot_body() {
        // Signing in one pass over "ts" "." "body" must match a single
        // concatenated update.
        let secret = "whsec_test";
        let timestamp = "1705315870000";
        let body = r#"{"amount":"99.99"}"#;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, body).as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(sign(secret, timestamp, body), expected);
    }

    #[test]
    fn test_generated_secrets_are_distinct_and_long() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert!(a.starts_with("whsec_"));
        // whsec_ + 64 hex chars = 256 bits of entropy
        assert_eq!(a.len(), 6 + 64);
    }
}
