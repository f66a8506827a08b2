use crate::payments::utils::verify_hmac_sha256_hex;

/// Validates inbound webhook authenticity against the shared webhook secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// `false` for an empty secret as well, so a misconfigured deployment never
    /// accepts unsigned events.
    pub fn verify(&self, raw_body: &[u8], signature: &str) -> bool {
        if self.secret.is_empty() || signature.trim().is_empty() {
            return false;
        }
        verify_hmac_sha256_hex(raw_body, &self.secret, signature)
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"[redacted]")
            .finish()
    }
}
