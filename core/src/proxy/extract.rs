//! Session authentication extractor

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ProxyError;
use crate::proxy::cookies::extract_cookie;
use crate::proxy::server::AppState;
use crate::session::SessionRecord;

/// Resolved session of the calling browser. Rejects with 401 when the
/// cookie is missing or does not resolve to a live session.
pub struct SessionAuth(pub SessionRecord);

impl FromRequestParts<AppState> for SessionAuth {
    type Rejection = ProxyError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 AppState,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self, Self::Rejection>> + Send + 'async_trait>,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        let cookie = extract_cookie(&parts.headers, &state.cookies.name);

        Box::pin(async move {
            let signed = cookie
                .ok_or_else(|| ProxyError::Unauthenticated("Not authenticated".to_string()))?;

            state
                .sessions
                .get(&signed)
                .await
                .map(SessionAuth)
                .ok_or_else(|| ProxyError::Unauthenticated("Invalid or expired session".to_string()))
        })
    }
}
