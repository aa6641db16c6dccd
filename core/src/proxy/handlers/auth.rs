//! Cookie session endpoints: login, logout, check

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ProxyError;
use crate::params::ParamType;
use crate::proxy::cookies::extract_cookie;
use crate::proxy::dispatcher::{resolve_base_url, ParamSpec, ProxyCall, UpstreamPayload, AUTH_ENDPOINT};
use crate::proxy::server::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default)]
    pub moodle_url: Option<String>,
}

fn default_service() -> String {
    "moodle_mobile_app".to_string()
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub user_id: Option<i64>,
    pub username: Option<String>,
}

impl LoginResponse {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            user_id: None,
            username: None,
        }
    }
}

/// Exchange credentials for a Moodle token and keep it server-side.
/// The browser only receives a signed session cookie.
pub async fn handle_login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(login): Json<LoginRequest>,
) -> Result<Response, ProxyError> {
    let client = client_key(connect_info.map(|ConnectInfo(addr)| addr));
    state
        .login_limiter
        .check(&client)
        .map_err(|retry_after| ProxyError::RateLimited { retry_after })?;

    let base_url = resolve_base_url(state.moodle_url.as_deref(), login.moodle_url.as_deref())?;

    let specs = [
        ParamSpec::new("username", ParamType::Str).required(),
        ParamSpec::new("password", ParamType::Str).required(),
        ParamSpec::new("service", ParamType::Str),
    ];
    let mut values = Map::new();
    values.insert("username".into(), Value::String(login.username.clone()));
    values.insert("password".into(), Value::String(login.password));
    values.insert("service".into(), Value::String(login.service));

    let outcome = state
        .dispatcher
        .dispatch(ProxyCall {
            endpoint: AUTH_ENDPOINT,
            method: Method::POST,
            function: None,
            specs: &specs,
            values: &values,
            base_url: &base_url,
            token: None,
        })
        .await?;

    let token_data = match outcome.payload {
        UpstreamPayload::Json(Value::Object(fields)) => fields,
        _ => {
            tracing::warn!("Unexpected token response from {}", base_url);
            return Ok(Json(LoginResponse::failed("Unexpected response from Moodle")).into_response());
        }
    };

    if token_data.contains_key("error") || token_data.contains_key("errorcode") {
        let message = token_data
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Authentication failed")
            .to_string();
        tracing::warn!("Moodle auth failed: {}", message);
        return Ok(Json(LoginResponse::failed(message)).into_response());
    }

    let Some(moodle_token) = token_data.get("token").and_then(Value::as_str).filter(|t| !t.is_empty()) else {
        return Ok(Json(LoginResponse::failed("No token received from Moodle")).into_response());
    };

    let signed = state.sessions.create(moodle_token, &base_url).await?;
    tracing::info!("Successful login for {}", login.username);

    let body = LoginResponse {
        success: true,
        message: "Login successful".to_string(),
        user_id: token_data.get("userid").and_then(Value::as_i64),
        username: Some(login.username),
    };
    Ok((
        [(header::SET_COOKIE, state.cookies.session_cookie(&signed))],
        Json(body),
    )
        .into_response())
}

pub async fn handle_logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(signed) = extract_cookie(&headers, &state.cookies.name) {
        state.sessions.delete(&signed).await;
    }
    tracing::info!("User logged out");

    (
        [(header::SET_COOKIE, state.cookies.cleared_cookie())],
        Json(json!({"success": true, "message": "Logged out successfully"})),
    )
        .into_response()
}

pub async fn handle_check(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    let session = match extract_cookie(&headers, &state.cookies.name) {
        Some(signed) => state.sessions.get(&signed).await,
        None => None,
    };

    match session {
        Some(record) => Json(json!({
            "authenticated": true,
            "moodle_url": record.upstream_base_url,
            "session_age": record.age_secs(),
        })),
        None => Json(json!({"authenticated": false})),
    }
}

/// Rate limit key: the peer IP address
fn client_key(peer: Option<SocketAddr>) -> String {
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
