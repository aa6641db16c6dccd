//! Generic handler for the declared web-service routes

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::HeaderMap;
use serde_json::{Map, Value};

use crate::error::ProxyError;
use crate::proxy::dispatcher::{resolve_base_url, resolve_token, ProxyCall, ProxyOutcome};
use crate::proxy::routes::RouteDescriptor;
use crate::proxy::server::AppState;

const MOODLE_URL_PARAM: &str = "moodle_url";
const TOKEN_PARAM: &str = "wstoken";

/// Proxy one declared function call. Parameters come from the query string
/// (repeated keys become arrays) and optionally a JSON object body.
pub async fn handle_endpoint(
    route: Arc<RouteDescriptor>,
    state: AppState,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Bytes,
) -> Result<ProxyOutcome, ProxyError> {
    let mut values = collect_values(query, &body)?;

    let supplied_url = values
        .remove(MOODLE_URL_PARAM)
        .and_then(|v| v.as_str().map(str::to_string));
    let base_url = resolve_base_url(state.moodle_url.as_deref(), supplied_url.as_deref())?;

    let query_token = values
        .remove(TOKEN_PARAM)
        .and_then(|v| v.as_str().map(str::to_string));
    let token = resolve_token(&headers, query_token.as_deref());

    tracing::debug!("{} {} -> {}", route.method, route.path, route.function);

    state
        .dispatcher
        .dispatch(ProxyCall {
            endpoint: &route.endpoint,
            method: route.method.clone(),
            function: Some(&route.function),
            specs: &route.params,
            values: &values,
            base_url: &base_url,
            token: token.as_deref(),
        })
        .await
}

fn collect_values(query: Vec<(String, String)>, body: &Bytes) -> Result<Map<String, Value>, ProxyError> {
    let mut values = Map::new();

    for (key, value) in query {
        match values.get_mut(&key) {
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                values.insert(key, Value::String(value));
            }
        }
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(values);
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => {
            for (key, value) in fields {
                values.entry(key).or_insert(value);
            }
            Ok(values)
        }
        _ => Err(ProxyError::BadRequest(
            "Request body must be a JSON object".to_string(),
        )),
    }
}
