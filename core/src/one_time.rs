//! One-time file tokens
//! Short-lived, single-use credential bundles for fetchers that cannot carry
//! the session cookie (e.g. Office Live Viewer)

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProxyError;
use crate::session::{random_token, short_id, BackendError, KvBackend, SessionRecord};

pub const OT_TOKEN_PREFIX: &str = "ot_token:";

/// Everything needed to fetch one resource on behalf of a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenBundle {
    pub resource_path: String,
    pub upstream_base_url: String,
    pub upstream_token: String,
    pub origin_session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Never issued, already consumed, or expired
    #[error("Token not found or expired")]
    NotFound,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<TokenError> for ProxyError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::NotFound => ProxyError::TokenNotFound,
            TokenError::Backend(e) => ProxyError::Backend(e),
        }
    }
}

pub struct OneTimeTokenService {
    backend: Arc<dyn KvBackend>,
    ttl: Duration,
}

impl OneTimeTokenService {
    pub fn new(backend: Arc<dyn KvBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stage a bundle for `resource_path`. The TTL is fixed and unrelated to
    /// the remaining lifetime of `session`.
    pub async fn issue(
        &self,
        resource_path: &str,
        session: &SessionRecord,
    ) -> Result<IssuedToken, BackendError> {
        let token = random_token();
        let bundle = TokenBundle {
            resource_path: resource_path.to_string(),
            upstream_base_url: session.upstream_base_url.clone(),
            upstream_token: session.upstream_token.clone(),
            origin_session_id: session.session_id.clone(),
        };

        self.backend
            .put(&token_key(&token), serde_json::to_string(&bundle)?, self.ttl)
            .await?;

        tracing::info!(
            "Generated one-time token for session {}..., file: {}",
            short_id(&session.session_id),
            resource_path
        );

        Ok(IssuedToken {
            token,
            expires_in: self.ttl.as_secs(),
        })
    }

    /// Redeem a token. The read deletes the record, so at most one caller
    /// ever sees a given bundle.
    pub async fn consume(&self, token: &str) -> Result<TokenBundle, TokenError> {
        let raw = self
            .backend
            .take(&token_key(token))
            .await?
            .ok_or(TokenError::NotFound)?;

        let bundle: TokenBundle = serde_json::from_str(&raw).map_err(|e| {
            tracing::error!("Discarding unreadable one-time token record: {}", e);
            TokenError::NotFound
        })?;

        tracing::info!(
            "One-time token used by session {}..., file: {}",
            short_id(&bundle.origin_session_id),
            bundle.resource_path
        );
        Ok(bundle)
    }
}

fn token_key(token: &str) -> String {
    format!("{}{}", OT_TOKEN_PREFIX, token)
}
