//! Webhook signature verification
//!
//! GitHub signs every webhook delivery with HMAC-SHA256 over the raw body
//! and sends the hex digest in `X-Hub-Signature-256` as `sha256=<hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies a webhook delivery signature
///
/// Returns false on a missing/malformed header or a digest mismatch. The
/// comparison runs in constant time via the Mac verifier.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Some(expected) = decode_hex(hex_digest) else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Computes the `sha256=<hex>` signature for a payload
///
/// Used when registering webhooks locally and by tests.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    let digest = mac.finalize().into_bytes();

    let mut out = String::with_capacity(7 + digest.len() * 2);
    out.push_str("sha256=");
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }

    (0..input.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(input.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_signature_verifies() {
        let body = br#"{"action":"queued"}"#;
        let signature = sign_payload("my_secret", body);

        assert!(signature.starts_with("sha256="));
        assert!(verify_signature("my_secret", body, &signature));
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let signature = sign_payload("my_secret", br#"{"action":"queued"}"#);
        assert!(!verify_signature(
            "my_secret",
            br#"{"action":"completed"}"#,
            &signature
        ));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let body = br#"{"action":"queued"}"#;
        let signature = sign_payload("my_secret", body);
        assert!(!verify_signature("other_secret", body, &signature));
    }

    #[test]
    fn test_malformed_header_is_rejected() {
        let body = b"payload";
        assert!(!verify_signature("secret", body, ""));
        assert!(!verify_signature("secret", body, "sha1=abcdef"));
        assert!(!verify_signature("secret", body, "sha256=zz"));
        assert!(!verify_signature("secret", body, "sha256=abc"));
    }
}
