//! One-time file links for external viewers (Office Live Viewer)

use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ProxyError;
use crate::proxy::extract::SessionAuth;
use crate::proxy::relay::{file_url, relay_response, CachePolicy};
use crate::proxy::server::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateTokenRequest {
    /// e.g. `/webservice/pluginfile.php/123/mod_resource/content/1/document.docx`
    pub file_path: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateTokenResponse {
    pub token: String,
    pub file_url: String,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub token: String,
}

/// POST /office/generate-token
pub async fn handle_generate_token(
    State(state): State<AppState>,
    SessionAuth(session): SessionAuth,
    Json(request): Json<GenerateTokenRequest>,
) -> Result<Json<GenerateTokenResponse>, ProxyError> {
    if request.file_path.trim().is_empty() {
        return Err(ProxyError::BadRequest("file_path must not be empty".to_string()));
    }

    let issued = state.one_time.issue(&request.file_path, &session).await?;

    Ok(Json(GenerateTokenResponse {
        file_url: format!("/office/file?token={}", issued.token),
        token: issued.token,
        expires_in: issued.expires_in,
    }))
}

/// GET /office/file?token=...
///
/// Public: the token itself is the credential and is burned on first use,
/// even when the subsequent upstream fetch fails.
pub async fn handle_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Response, ProxyError> {
    let bundle = state.one_time.consume(&query.token).await?;

    let url = file_url(&bundle.upstream_base_url, &bundle.resource_path);
    let upstream = state
        .dispatcher
        .fetch_file(&url, &bundle.upstream_token)
        .await?;
    relay_response(upstream, &bundle.resource_path, CachePolicy::NoStore)
}
