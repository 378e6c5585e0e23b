//! Webhook signature validation (§2, §4.4, §6 "Webhook wire format"):
//! HMAC-SHA-256 of the raw body, keyed with a shared secret, compared
//! constant-time against the hex-encoded `x-groupsio-signature` header.
//!
//! Grounded directly on `common::api::callback::{generate_callback_signature,
//! verify_callback_signature, constant_time_compare}`, adapted from that
//! module's timestamp-plus-body payload to a bare-body HMAC per §6's wire
//! format (the GroupsIO webhook has no timestamp field to bind against).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes the hex-encoded HMAC-SHA-256 of `body` keyed by `secret`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies `signature_hex` (case-insensitive hex) against the HMAC-SHA-256
/// of `body` keyed by `secret`, using a constant-time comparison (§4.4, §8
/// "one bit-flip in the body or signature yields rejection").
pub fn verify(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let expected = sign(secret, body);
    constant_time_eq(expected.as_bytes(), signature_hex.to_lowercase().as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
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
    fn accepts_correct_signature() {
        let secret = b"shared-secret";
        let body = br#"{"id":"1","action":"created_subgroup"}"#;
        let signature = sign(secret, body);
        assert!(verify(secret, body, &signature));
        assert!(verify(secret, body, &signature.to_uppercase()));
    }

    #[test]
    fn rejects_flipped_body_bit() {
        let secret = b"shared-secret";
        let body = br#"{"id":"1","action":"created_subgroup"}"#;
        let signature = sign(secret, body);
        let mut tampered = body.to_vec();
        tampered[5] ^= 0x01;
        assert!(!verify(secret, &tampered, &signature));
    }

    #[test]
    fn rejects_flipped_signature_bit() {
        let secret = b"shared-secret";
        let body = br#"{"id":"1","action":"created_subgroup"}"#;
        let mut signature = sign(secret, body);
        let last = signature.pop().unwrap();
        let flipped = if last == '0' { '1' } else { '0' };
        signature.push(flipped);
        assert!(!verify(secret, body, &signature));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = br#"{"id":"1"}"#;
        let signature = sign(b"right-secret", body);
        assert!(!verify(b"wrong-secret", body, &signature));
    }
}
