use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `body` keyed by `secret`.
pub fn generate_signature(secret: &str, body: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex HMAC-SHA256 signature using constant-time comparison.
///
/// Accepts an optional `sha256=` prefix, which several webhook senders use.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> Result<bool, anyhow::Error> {
    let expected_signature = generate_signature(secret, body)?;
    let provided = signature.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);

    let expected_bytes = expected_signature.as_bytes();
    let signature_bytes = provided.to_ascii_lowercase();
    let signature_bytes = signature_bytes.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}

/// SHA-256 hex digest used to store bearer tokens without keeping the raw value.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
