use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

fn keyed(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::WebhookVerification(format!("invalid HMAC key: {e}")))
}

/// Check `X-Hub-Signature-256` (`sha256=<hex>`) against the payload.
/// The comparison is constant-time.
pub fn verify_signature(secret: &str, payload: &[u8], header: &str) -> Result<()> {
    let digest = header
        .trim()
        .strip_prefix(PREFIX)
        .ok_or_else(|| AppError::WebhookVerification(format!("signature lacks {PREFIX} prefix")))
        .and_then(|hex_digest| {
            hex::decode(hex_digest).map_err(|e| AppError::WebhookVerification(format!("signature is not hex: {e}")))
        })?;

    let mut mac = keyed(secret)?;
    mac.update(payload);
    mac.verify_slice(&digest)
        .map_err(|_| AppError::WebhookVerification("signature does not match payload".to_string()))
}

/// The header value GitHub would send for `payload`.
pub fn sign(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = keyed(secret)?;
    mac.update(payload);
    Ok(format!("{PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_payload_verifies() {
        let header = sign("s3cret", br#"{"action":"labeled"}"#).unwrap();
        assert!(verify_signature("s3cret", br#"{"action":"labeled"}"#, &header).is_ok());
    }

    #[test]
    fn test_tampered_payload_or_wrong_secret_fails() {
        let header = sign("s3cret", b"payload").unwrap();
        assert!(verify_signature("s3cret", b"payload!", &header).is_err());
        assert!(verify_signature("other", b"payload", &header).is_err());
    }

    #[test]
    fn test_malformed_header_is_rejected() {
        let header = sign("s3cret", b"payload").unwrap();
        let bare = header.trim_start_matches(PREFIX);
        assert!(matches!(
            verify_signature("s3cret", b"payload", bare),
            Err(AppError::WebhookVerification(_))
        ));
        assert!(verify_signature("s3cret", b"payload", "sha256=zz").is_err());
    }
}
