//! Timestamped HMAC-SHA256 envelopes for session identifiers
//!
//! Envelope layout: `<value>.<timestamp>.<signature>`, where the timestamp is
//! the big-endian Unix time in seconds and both trailing parts are unpadded
//! URL-safe base64.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const KEY_SALT: &str = "moodleware.session-signer";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed envelope")]
    Malformed,

    #[error("signature does not match")]
    BadSignature,

    #[error("signature expired ({age}s old)")]
    Expired { age: i64 },
}

pub struct Signer {
    key: [u8; 32],
}

impl Signer {
    pub fn new(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_SALT.as_bytes());
        hasher.update(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&hasher.finalize());
        Self { key }
    }

    pub fn sign(&self, value: &str) -> String {
        self.sign_at(value, chrono::Utc::now().timestamp())
    }

    /// Sign with an explicit issue time
    pub fn sign_at(&self, value: &str, timestamp: i64) -> String {
        let payload = format!("{}.{}", value, URL_SAFE_NO_PAD.encode(timestamp.to_be_bytes()));
        let signature = URL_SAFE_NO_PAD.encode(self.mac(payload.as_bytes()));
        format!("{}.{}", payload, signature)
    }

    /// Verify an envelope and return the wrapped value if it is at most
    /// `max_age` seconds old.
    pub fn unsign(&self, envelope: &str, max_age: u64) -> Result<String, SignatureError> {
        self.unsign_at(envelope, max_age, chrono::Utc::now().timestamp())
    }

    pub fn unsign_at(&self, envelope: &str, max_age: u64, now: i64) -> Result<String, SignatureError> {
        let (payload, signature) = envelope.rsplit_once('.').ok_or(SignatureError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignatureError::Malformed)?;

        let mut mac = self.hmac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SignatureError::BadSignature)?;

        let (value, timestamp) = payload.rsplit_once('.').ok_or(SignatureError::Malformed)?;
        let timestamp: [u8; 8] = URL_SAFE_NO_PAD
            .decode(timestamp)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(SignatureError::Malformed)?;

        let age = now - i64::from_be_bytes(timestamp);
        if age > i64::try_from(max_age).unwrap_or(i64::MAX) {
            return Err(SignatureError::Expired { age });
        }

        Ok(value.to_string())
    }

    fn hmac(&self) -> Result<HmacSha256, SignatureError> {
        HmacSha256::new_from_slice(&self.key).map_err(|_| SignatureError::BadSignature)
    }

    fn mac(&self, payload: &[u8]) -> Vec<u8> {
        match self.hmac() {
            Ok(mut mac) => {
                mac.update(payload);
                mac.finalize().into_bytes().to_vec()
            }
            Err(_) => Vec::new(),
        }
    }
}
