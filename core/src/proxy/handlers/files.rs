//! Session-authenticated file proxy
//! The Moodle token is appended server-side and never reaches the browser

use axum::extract::{Path, State};
use axum::response::Response;

use crate::error::ProxyError;
use crate::proxy::extract::SessionAuth;
use crate::proxy::relay::{expand_session_path, file_url, relay_response, CachePolicy};
use crate::proxy::server::AppState;

/// GET /files/*path
pub async fn handle_file(
    State(state): State<AppState>,
    SessionAuth(session): SessionAuth,
    Path(path): Path<String>,
) -> Result<Response, ProxyError> {
    let path = expand_session_path(&path);
    let url = file_url(&session.upstream_base_url, &path);
    tracing::debug!("Proxying file {}", url);

    let upstream = state
        .dispatcher
        .fetch_file(&url, &session.upstream_token)
        .await?;
    relay_response(upstream, &path, CachePolicy::Shared)
}
