//! Property-based tests for payload signing.

use hookwire_core::signature::{secure_compare, sign, verify};
use proptest::prelude::*;

proptest! {
    /// Any signed payload verifies with the signing secret.
    #[test]
    fn sign_then_verify_succeeds(
        secret in "[a-zA-Z0-9_-]{1,64}",
        payload in proptest::collection::vec(any::<u8>(), 0..2048),
    ) {
        let signature = sign(&secret, &payload).unwrap();
        prop_assert!(verify(&secret, &payload, &signature).unwrap());
    }

    /// Signature values always carry the scheme prefix and a 64-char hex
    /// digest.
    #[test]
    fn signature_format_is_stable(
        secret in "[a-zA-Z0-9]{1,32}",
        payload in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let signature = sign(&secret, &payload).unwrap();
        let digest = signature.strip_prefix("sha256=").unwrap();
        prop_assert_eq!(digest.len(), 64);
        prop_assert!(digest.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    /// Verification with a different secret fails.
    #[test]
    fn wrong_secret_fails_verification(
        secret in "[a-z]{8,32}",
        payload in proptest::collection::vec(any::<u8>(), 1..512),
    ) {
        let other = format!("{secret}x");
        let signature = sign(&secret, &payload).unwrap();
        prop_assert!(!verify(&other, &payload, &signature).unwrap());
    }

    /// Flipping any payload byte invalidates the signature.
    #[test]
    fn tampered_payload_fails_verification(
        secret in "[a-z]{8,32}",
        payload in proptest::collection::vec(any::<u8>(), 1..512),
        index in 0usize..512,
    ) {
        let signature = sign(&secret, &payload).unwrap();

        let mut tampered = payload.clone();
        let i = index % tampered.len();
        tampered[i] ^= 0x01;

        prop_assert!(!verify(&secret, &tampered, &signature).unwrap());
    }

    /// secure_compare agrees with slice equality.
    #[test]
    fn secure_compare_matches_equality(
        a in proptest::collection::vec(any::<u8>(), 0..128),
        b in proptest::collection::vec(any::<u8>(), 0..128),
    ) {
        prop_assert_eq!(secure_compare(&a, &b), a == b);
        prop_assert!(secure_compare(&a, &a));
    }
}
