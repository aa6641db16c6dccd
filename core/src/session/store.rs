//! Session store
//! Maps signed client envelopes to server-side Moodle credentials

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{random_token, short_id, BackendError, KvBackend, SignatureError, Signer};

pub const SESSION_PREFIX: &str = "session:";

/// Server-side record for one authenticated browser context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub session_id: String,
    pub upstream_token: String,
    pub upstream_base_url: String,
    pub created_at: i64,
    pub last_accessed_at: i64,
}

impl SessionRecord {
    /// Seconds between creation and the most recent access
    pub fn age_secs(&self) -> i64 {
        self.last_accessed_at - self.created_at
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub session_max_age: u64,
    pub storage_type: &'static str,
}

pub struct SessionStore {
    backend: Arc<dyn KvBackend>,
    signer: Signer,
    max_age: Duration,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn KvBackend>, signer: Signer, max_age: Duration) -> Self {
        Self {
            backend,
            signer,
            max_age,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Backend shared with the one-time token service
    pub fn backend(&self) -> Arc<dyn KvBackend> {
        self.backend.clone()
    }

    /// Persist a new session and return the signed envelope for the cookie
    pub async fn create(
        &self,
        upstream_token: &str,
        upstream_base_url: &str,
    ) -> Result<String, BackendError> {
        let session_id = random_token();
        let now = chrono::Utc::now().timestamp();
        let record = SessionRecord {
            session_id: session_id.clone(),
            upstream_token: upstream_token.to_string(),
            upstream_base_url: upstream_base_url.to_string(),
            created_at: now,
            last_accessed_at: now,
        };

        self.backend
            .put(&session_key(&session_id), serde_json::to_string(&record)?, self.max_age)
            .await?;

        tracing::info!("Created session {}... for {}", short_id(&session_id), upstream_base_url);
        Ok(self.signer.sign(&session_id))
    }

    /// Resolve a signed envelope to its record, refreshing the sliding TTL.
    ///
    /// Every failure (bad signature, expired envelope, unknown id, backend
    /// error) reads as "no session".
    pub async fn get(&self, signed_session_id: &str) -> Option<SessionRecord> {
        let session_id = self.verify(signed_session_id)?;
        let key = session_key(&session_id);

        let raw = match self.backend.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::warn!("Session {}... not found", short_id(&session_id));
                return None;
            }
            Err(e) => {
                tracing::error!("Error retrieving session: {}", e);
                return None;
            }
        };

        let mut record: SessionRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("Corrupt session record {}...: {}", short_id(&session_id), e);
                return None;
            }
        };

        record.last_accessed_at = chrono::Utc::now().timestamp();
        match serde_json::to_string(&record) {
            Ok(encoded) => match self.backend.replace(&key, encoded, self.max_age).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!("Session {}... removed during lookup", short_id(&session_id));
                    return None;
                }
                Err(e) => tracing::warn!("Failed to refresh session {}...: {}", short_id(&session_id), e),
            },
            Err(e) => tracing::warn!("Failed to encode session {}...: {}", short_id(&session_id), e),
        }

        Some(record)
    }

    /// Best-effort removal; returns whether a record existed
    pub async fn delete(&self, signed_session_id: &str) -> bool {
        let Some(session_id) = self.verify(signed_session_id) else {
            return false;
        };

        match self.backend.delete(&session_key(&session_id)).await {
            Ok(existed) => {
                if existed {
                    tracing::info!("Deleted session {}...", short_id(&session_id));
                }
                existed
            }
            Err(e) => {
                tracing::error!("Error deleting session: {}", e);
                false
            }
        }
    }

    pub async fn stats(&self) -> SessionStats {
        let active_sessions = self
            .backend
            .count_prefix(SESSION_PREFIX)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to count sessions: {}", e);
                0
            });

        SessionStats {
            active_sessions,
            session_max_age: self.max_age.as_secs(),
            storage_type: self.backend.kind(),
        }
    }

    fn verify(&self, signed_session_id: &str) -> Option<String> {
        match self.signer.unsign(signed_session_id, self.max_age.as_secs()) {
            Ok(session_id) => Some(session_id),
            Err(SignatureError::Expired { age }) => {
                tracing::info!("Session expired ({}s old)", age);
                None
            }
            Err(e) => {
                tracing::warn!("Invalid session signature: {}", e);
                None
            }
        }
    }
}

fn session_key(session_id: &str) -> String {
    format!("{}{}", SESSION_PREFIX, session_id)
}
