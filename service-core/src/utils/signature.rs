use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute a detached HMAC-SHA256 signature over a raw payload.
///
/// The payload is signed exactly as given (no canonicalization); callers that
/// verify inbound bodies must sign the unparsed bytes they received.
pub fn sign(secret: &str, payload: &str) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(payload.as_bytes());
    let result = mac.finalize();

    Ok(hex::encode(result.into_bytes()))
}

/// Verify a detached HMAC-SHA256 signature using constant-time comparison.
pub fn verify(secret: &str, payload: &str, signature: &str) -> Result<bool, anyhow::Error> {
    let expected = sign(secret, payload)?;

    let expected_bytes = expected.as_bytes();
    let signature_bytes = signature.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let secret = "my_secret_key";
        let payload = r#"{"type":"subscription.updated"}"#;

        let signature = sign(secret, payload).unwrap();
        assert!(!signature.is_empty());

        assert!(verify(secret, payload, &signature).unwrap());
    }

    #[test]
    fn test_invalid_signature() {
        let secret = "my_secret_key";
        let payload = r#"{"type":"subscription.updated"}"#;

        let signature = sign(secret, payload).unwrap();
        let invalid = format!("a{}", &signature[1..]);

        assert!(!verify(secret, payload, &invalid).unwrap());
    }

    #[test]
    fn test_tampered_payload() {
        let secret = "my_secret_key";
        let payload = r#"{"type":"subscription.updated"}"#;

        let signature = sign(secret, payload).unwrap();

        let tampered = r#"{"type":"subscription.deleted"}"#;
        assert!(!verify(secret, tampered, &signature).unwrap());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let secret = "my_secret_key";
        let signature = sign(secret, "payload").unwrap();

        assert!(!verify(secret, "payload", &signature[..10]).unwrap());
    }
}
