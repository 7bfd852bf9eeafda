//! `X-Hub-Signature-256` verification for inbound webhooks.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const SIGNATURE_PREFIX: &str = "sha256=";

/// Checks `header` against the HMAC-SHA256 of the raw body.
///
/// Without a configured secret every request is accepted; that mode exists
/// for local development only. With a secret, a missing or empty header, a
/// wrong prefix, or a digest of the wrong length is rejected before the
/// constant-time comparison runs.
pub fn verify_signature(secret: Option<&str>, body: &[u8], header: Option<&str>) -> bool {
    let Some(secret) = secret.filter(|secret| !secret.is_empty()) else {
        return true;
    };
    let Some(provided) = header.map(str::trim).filter(|value| !value.is_empty()) else {
        return false;
    };
    if !provided.starts_with(SIGNATURE_PREFIX) {
        return false;
    }
    let Some(expected) = sign_payload(secret, body) else {
        return false;
    };

    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Header value a sender holding `secret` would attach to `body`.
pub fn sign_payload(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
}

#[cfg(test)]
mod tests {
    use super::{sign_payload, verify_signature};

    const SECRET: &str = "app-secret";
    const BODY: &[u8] = br#"{"object":"page","entry":[]}"#;

    fn signature() -> String {
        sign_payload(SECRET, BODY).expect("sign payload")
    }

    #[test]
    fn identical_body_and_secret_verify() {
        assert!(verify_signature(Some(SECRET), BODY, Some(&signature())));
    }

    #[test]
    fn known_vector_matches() {
        let header = sign_payload("key", b"The quick brown fox jumps over the lazy dog")
            .expect("sign payload");
        assert_eq!(
            header,
            "sha256=f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn flipping_any_body_byte_fails() {
        let header = signature();
        for index in 0..BODY.len() {
            let mut tampered = BODY.to_vec();
            tampered[index] ^= 0x01;
            assert!(
                !verify_signature(Some(SECRET), &tampered, Some(&header)),
                "byte {index} flip should fail verification"
            );
        }
    }

    #[test]
    fn flipping_any_secret_byte_fails() {
        let header = signature();
        for index in 0..SECRET.len() {
            let mut tampered = SECRET.as_bytes().to_vec();
            tampered[index] ^= 0x01;
            let tampered = String::from_utf8(tampered).expect("ascii secret stays utf8");
            assert!(!verify_signature(Some(&tampered), BODY, Some(&header)));
        }
    }

    #[test]
    fn missing_empty_or_truncated_signatures_fail() {
        let header = signature();

        assert!(!verify_signature(Some(SECRET), BODY, None));
        assert!(!verify_signature(Some(SECRET), BODY, Some("")));
        assert!(!verify_signature(Some(SECRET), BODY, Some("sha256=")));
        assert!(!verify_signature(Some(SECRET), BODY, Some(&header[..header.len() - 1])));
        assert!(!verify_signature(Some(SECRET), BODY, Some(header.trim_start_matches("sha256="))));
        assert!(!verify_signature(Some(SECRET), BODY, Some(&header.replace("sha256=", "sha1=__"))));
    }

    #[test]
    fn absent_secret_is_permissive() {
        assert!(verify_signature(None, BODY, None));
        assert!(verify_signature(Some(""), BODY, Some("garbage")));
    }
}
