//! Webhook signature verification
//!
//! The storefront signs the raw request body with HMAC-SHA256 and sends the
//! base64 digest in `X-Shop-Hmac-Sha256`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::PipelineError;

/// Verify `signature_b64` against `body` under `secret` (constant-time compare)
pub fn verify_webhook_signature(
    body: &[u8],
    signature_b64: &str,
    secret: &str,
) -> Result<(), PipelineError> {
    let expected = STANDARD
        .decode(signature_b64.trim())
        .map_err(|_| PipelineError::Authentication("signature is not valid base64".into()))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| PipelineError::Configuration("HMAC key error".into()))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| PipelineError::Authentication("webhook signature mismatch".into()))
}

/// Base64 HMAC-SHA256 of `body`, as the platform would send it
pub fn sign_webhook(body: &[u8], secret: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(body);
    STANDARD.encode(mac.finalize().into_bytes())
}
