//! HMAC-SHA256 payload signing and verification.
//!
//! Every outbound request carries a signature over the exact serialized
//! payload bytes, so receivers can authenticate the sender and detect
//! tampering. Verification uses constant-time comparison to prevent timing
//! attacks against the signature check.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Prefix identifying the signature scheme in the header value.
const SCHEME_PREFIX: &str = "sha256=";

/// Errors from signing or verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// The signing secret was empty.
    #[error("signing secret must not be empty")]
    EmptySecret,
}

/// Computes the signature header value for a payload.
///
/// Returns `sha256=<lowercase hex digest>`. The payload may be empty; an
/// empty secret is rejected because it would make every signature forgeable.
pub fn sign(secret: &str, payload: &[u8]) -> Result<String, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::EmptySecret);
    }

    // HMAC accepts keys of any length, so new_from_slice cannot fail here.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::EmptySecret)?;
    mac.update(payload);
    let digest = mac.finalize().into_bytes();

    Ok(format!("{SCHEME_PREFIX}{}", hex::encode(digest)))
}

/// Verifies a received signature header value against a payload.
///
/// Returns false for malformed values, unknown schemes, or digest
/// mismatches. Never returns an error for attacker-controlled input; only an
/// empty secret is a caller error.
pub fn verify(secret: &str, payload: &[u8], signature: &str) -> Result<bool, SignatureError> {
    let expected = sign(secret, payload)?;
    Ok(secure_compare(expected.as_bytes(), signature.as_bytes()))
}

/// Constant-time byte comparison.
///
/// Examines every byte regardless of where the first difference occurs, so
/// comparison time leaks only the length.
pub fn secure_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_produces_prefixed_hex() {
        let signature = sign("secret", b"{\"order\":42}").unwrap();
        assert!(signature.starts_with("sha256="));
        let hex_part = &signature["sha256=".len()..];
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn sign_is_deterministic() {
        let a = sign("secret", b"payload").unwrap();
        let b = sign("secret", b"payload").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_secrets_produce_different_signatures() {
        let a = sign("secret-a", b"payload").unwrap();
        let b = sign("secret-b", b"payload").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_payload_signs_successfully() {
        let signature = sign("secret", b"").unwrap();
        assert!(verify("secret", b"", &signature).unwrap());
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert_eq!(sign("", b"payload"), Err(SignatureError::EmptySecret));
        assert_eq!(verify("", b"payload", "sha256=00"), Err(SignatureError::EmptySecret));
    }

    #[test]
    fn verify_round_trip() {
        let payload = br#"{"event":"order.completed","id":7}"#;
        let signature = sign("topsecret", payload).unwrap();
        assert!(verify("topsecret", payload, &signature).unwrap());
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let signature = sign("topsecret", b"original").unwrap();
        assert!(!verify("topsecret", b"tampered", &signature).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_scheme_and_garbage() {
        let payload = b"payload";
        let signature = sign("s", payload).unwrap();
        let digest = &signature["sha256=".len()..];

        assert!(!verify("s", payload, &format!("sha1={digest}")).unwrap());
        assert!(!verify("s", payload, digest).unwrap());
        assert!(!verify("s", payload, "").unwrap());
        assert!(!verify("s", payload, "not-a-signature").unwrap());
    }

    #[test]
    fn secure_compare_length_mismatch() {
        assert!(!secure_compare(b"abc", b"abcd"));
        assert!(secure_compare(b"", b""));
        assert!(secure_compare(b"same", b"same"));
        assert!(!secure_compare(b"same", b"sane"));
    }
}
