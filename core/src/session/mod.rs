//! Session management
//! Signed session envelopes backed by a pluggable expiring key/value store

pub mod backend;
pub mod signer;
pub mod store;

pub use backend::{BackendError, KvBackend, MemoryBackend};
pub use signer::{SignatureError, Signer};
pub use store::{SessionRecord, SessionStats, SessionStore};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;

const TOKEN_BYTES: usize = 32;

/// Generate a random URL-safe identifier carrying 256 bits of entropy
pub fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Leading characters of an identifier, for log lines
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
