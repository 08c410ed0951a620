//! Webhook signature verification.
//!
//! Shopify signs the raw body with HMAC-SHA256 and sends it base64-encoded in
//! `X-Shopify-Hmac-Sha256`. Mirakl signs with HMAC-SHA1 and sends lowercase
//! hex in `X-Mirakl-Signature`. Comparisons are constant-time.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const SHOPIFY_SIGNATURE_HEADER: &str = "x-shopify-hmac-sha256";
pub const MIRAKL_SIGNATURE_HEADER: &str = "x-mirakl-signature";

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Base64 HMAC-SHA256 of `body`, as Shopify computes it.
#[must_use]
pub fn shopify_signature(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so construction cannot fail.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Hex HMAC-SHA1 of `body`, as Mirakl computes it.
#[must_use]
pub fn mirakl_signature(secret: &str, body: &[u8]) -> String {
    let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a Shopify webhook. An empty secret never verifies.
#[must_use]
pub fn verify_shopify(secret: &str, body: &[u8], header: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let expected = shopify_signature(secret, body);
    constant_time_eq(expected.as_bytes(), header.trim().as_bytes())
}

/// Checks a Mirakl webhook. Hex case and an optional `sha1=` prefix are ignored.
#[must_use]
pub fn verify_mirakl(secret: &str, body: &[u8], header: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let received = header.trim();
    let received = received.strip_prefix("sha1=").unwrap_or(received);
    let expected = mirakl_signature(secret, body);
    constant_time_eq(
        expected.as_bytes(),
        received.to_ascii_lowercase().as_bytes(),
    )
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    !a.is_empty() && a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"id":820982911946154508,"email":"jon@example.com"}"#;

    #[test]
    fn shopify_signature_round_trips() {
        let header = shopify_signature("hush", BODY);
        assert!(verify_shopify("hush", BODY, &header));
        assert!(verify_shopify("hush", BODY, &format!(" {header} ")));
    }

    #[test]
    fn shopify_rejects_tampered_body_and_wrong_secret() {
        let header = shopify_signature("hush", BODY);
        assert!(!verify_shopify("hush", b"{}", &header));
        assert!(!verify_shopify("other", BODY, &header));
        assert!(!verify_shopify("", BODY, &header));
        assert!(!verify_shopify("hush", BODY, ""));
    }

    #[test]
    fn shopify_signature_matches_known_vector() {
        // RFC 4231 test case 2
        let sig = shopify_signature("Jefe", b"what do ya want for nothing?");
        assert_eq!(sig, "W9zBRr9gdU5qBCQmCJV1x1oAPwidJzmDnexYuWTsOEM=");
    }

    #[test]
    fn mirakl_signature_matches_known_vector() {
        // RFC 2202 test case 2
        let sig = mirakl_signature("Jefe", b"what do ya want for nothing?");
        assert_eq!(sig, "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
    }

    #[test]
    fn mirakl_accepts_uppercase_and_prefix() {
        let sig = mirakl_signature("s3cret", BODY);
        assert!(verify_mirakl("s3cret", BODY, &sig));
        assert!(verify_mirakl("s3cret", BODY, &sig.to_uppercase()));
        assert!(verify_mirakl("s3cret", BODY, &format!("sha1={sig}")));
        assert!(!verify_mirakl("s3cret", b"tampered", &sig));
    }
}
