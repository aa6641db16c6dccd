//! Proxy dispatcher
//! Turns one declared web-service call into an upstream Moodle request

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::ProxyError;
use crate::params::{encode_param, form_pairs, ParamSet, ParamType};
use crate::proxy::upstream::client::UpstreamClient;

/// Moodle's token endpoint; never receives `wstoken`
pub const AUTH_ENDPOINT: &str = "/login/token.php";
/// Moodle's generic REST server
pub const REST_ENDPOINT: &str = "/webservice/rest/server.php";

const DIRECT_URL_HEADER: HeaderName = HeaderName::from_static("x-moodle-direct-url");
const DIRECT_METHOD_HEADER: HeaderName = HeaderName::from_static("x-moodle-direct-method");

/// Declared parameter of a proxied function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,

    #[serde(default, rename = "type")]
    pub param_type: ParamType,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default)]
    pub description: String,

    /// Send the parameter with an empty value instead of omitting it
    #[serde(default)]
    pub send_if_empty: bool,
}

impl ParamSpec {
    pub fn new(name: &str, param_type: ParamType) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: false,
            default: None,
            description: String::new(),
            send_if_empty: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// One upstream call, fully resolved except for encoding
pub struct ProxyCall<'a> {
    /// Upstream path, e.g. `/webservice/rest/server.php`
    pub endpoint: &'a str,
    pub method: Method,
    /// Web-service function for the REST endpoint
    pub function: Option<&'a str>,
    pub specs: &'a [ParamSpec],
    pub values: &'a Map<String, Value>,
    pub base_url: &'a str,
    pub token: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamPayload {
    Json(Value),
    Text(String),
}

/// Successful upstream answer plus the request that produced it
#[derive(Debug, Clone)]
pub struct ProxyOutcome {
    pub payload: UpstreamPayload,
    pub direct_url: String,
    pub method: Method,
}

impl IntoResponse for ProxyOutcome {
    fn into_response(self) -> Response {
        let mut response = match self.payload {
            UpstreamPayload::Json(value) => Json(value).into_response(),
            UpstreamPayload::Text(text) => text.into_response(),
        };

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&self.direct_url) {
            headers.insert(DIRECT_URL_HEADER, value);
        }
        if let Ok(value) = HeaderValue::from_str(self.method.as_str()) {
            headers.insert(DIRECT_METHOD_HEADER, value);
        }
        response
    }
}

pub struct ProxyDispatcher {
    upstream: Arc<UpstreamClient>,
}

impl ProxyDispatcher {
    pub fn new(upstream: Arc<UpstreamClient>) -> Self {
        Self { upstream }
    }

    /// Encode declared parameters and inject the protocol fields
    pub fn build_params(call: &ProxyCall<'_>) -> Result<ParamSet, ProxyError> {
        let mut params = ParamSet::new();

        for spec in call.specs {
            let supplied = call
                .values
                .get(&spec.name)
                .filter(|v| !v.is_null())
                .or(spec.default.as_ref().filter(|v| !v.is_null()));

            match supplied {
                Some(value) if !is_empty(value) => {
                    encode_param(&mut params, &spec.name, value, spec.param_type);
                }
                Some(_) | None => {
                    if supplied.is_none() && spec.required {
                        return Err(ProxyError::BadRequest(format!(
                            "Missing required parameter: {}",
                            spec.name
                        )));
                    }
                    if spec.send_if_empty {
                        encode_param(&mut params, &spec.name, &Value::String(String::new()), spec.param_type);
                    }
                }
            }
        }

        if !call.endpoint.ends_with(AUTH_ENDPOINT) {
            if let Some(token) = call.token.filter(|t| !t.is_empty()) {
                params.insert("wstoken".to_string(), Value::String(token.to_string()));
            }
        }

        if call.endpoint.ends_with(REST_ENDPOINT) {
            if let Some(function) = call.function {
                params
                    .entry("wsfunction")
                    .or_insert_with(|| Value::String(function.to_string()));
            }
            params
                .entry("moodlewsrestformat")
                .or_insert_with(|| Value::String("json".to_string()));
        }

        Ok(params)
    }

    pub async fn dispatch(&self, call: ProxyCall<'_>) -> Result<ProxyOutcome, ProxyError> {
        let url = endpoint_url(call.base_url, call.endpoint);
        let params = Self::build_params(&call)?;
        let pairs = form_pairs(&params);
        let direct_url = UpstreamClient::build_url(&url, &pairs);
        let method = call.method;

        tracing::debug!("{} {} ({} params)", method, url, pairs.len());

        let response = self
            .upstream
            .call(method.clone(), &url, &pairs)
            .await
            .map_err(|e| connection_error(&url, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| connection_error(&url, e))?;

        if !status.is_success() {
            tracing::warn!("Moodle returned {} for {} {}", status, method, url);
            let detail = serde_json::from_str(&text).unwrap_or(Value::String(text));
            return Err(ProxyError::Upstream {
                status: status.as_u16(),
                detail,
            });
        }

        let payload = match serde_json::from_str::<Value>(&text) {
            Ok(value) => UpstreamPayload::Json(value),
            Err(_) => UpstreamPayload::Text(text),
        };

        Ok(ProxyOutcome {
            payload,
            direct_url,
            method,
        })
    }

    /// Fetch a file with the caller's upstream token
    pub async fn fetch_file(&self, url: &str, token: &str) -> Result<reqwest::Response, ProxyError> {
        let response = self
            .upstream
            .fetch_file(url, token)
            .await
            .map_err(|e| connection_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!("Failed to fetch file from Moodle: {}", status.as_u16());
            return Err(ProxyError::Upstream {
                status: status.as_u16(),
                detail: Value::String(format!("Failed to fetch file from Moodle: {}", status.as_u16())),
            });
        }
        Ok(response)
    }
}

fn is_empty(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.is_empty())
}

fn connection_error(url: &str, e: reqwest::Error) -> ProxyError {
    tracing::error!("Failed to connect to Moodle at {}: {}", url, e);
    ProxyError::Connection {
        url: url.to_string(),
        message: e.to_string(),
    }
}

/// Ensure a scheme (https by default) and drop trailing slashes
pub fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim();
    let lower = trimmed.to_lowercase();
    let with_scheme = if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    with_scheme.trim_end_matches('/').to_string()
}

/// Normalized base joined with an endpoint path
pub fn endpoint_url(base_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with('/') {
        format!("{}{}", normalize_base_url(base_url), endpoint)
    } else {
        format!("{}/{}", normalize_base_url(base_url), endpoint)
    }
}

/// Pick the Moodle base URL: the configured instance wins, the caller's
/// value is only used when none is configured.
pub fn resolve_base_url(configured: Option<&str>, supplied: Option<&str>) -> Result<String, ProxyError> {
    configured
        .or(supplied.map(str::trim).filter(|s| !s.is_empty()))
        .map(normalize_base_url)
        .ok_or_else(|| {
            ProxyError::Configuration(
                "Moodle URL not provided. Set MOODLE_URL env var or pass moodle_url as query param."
                    .to_string(),
            )
        })
}

/// Access token from `Authorization: Bearer`, falling back to `?wstoken=`
pub fn resolve_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| {
            let mut parts = auth.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
                    Some(token.to_string())
                }
                _ => None,
            }
        });

    from_header.or_else(|| {
        query_token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::any;
    use axum::Router;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(String, Vec<(String, String)>)>>>;

    /// Minimal stand-in for a Moodle site that records what it receives
    async fn mock_moodle() -> (String, Seen) {
        async fn record(
            State(seen): State<Seen>,
            method: Method,
            Query(query): Query<Vec<(String, String)>>,
            body: String,
        ) -> (StatusCode, String) {
            let mut params = query;
            if method == Method::POST {
                params.extend(parse_form(&body));
            }
            let function = params
                .iter()
                .find(|(k, _)| k == "wsfunction")
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            seen.lock().await.push((method.to_string(), params));

            match function.as_str() {
                "broken" => (StatusCode::INTERNAL_SERVER_ERROR, r#"{"exception":"moodle_exception"}"#.into()),
                "plain" => (StatusCode::FORBIDDEN, "access denied".into()),
                "text" => (StatusCode::OK, "not json at all".into()),
                _ => (StatusCode::OK, r#"{"sitename":"Test Moodle"}"#.into()),
            }
        }

        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/webservice/rest/server.php", any(record))
            .route("/login/token.php", any(record))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), seen)
    }

    fn parse_form(body: &str) -> Vec<(String, String)> {
        reqwest::Url::parse(&format!("http://mock/?{}", body))
            .map(|url| {
                url.query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn dispatcher() -> ProxyDispatcher {
        let client = UpstreamClient::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap();
        ProxyDispatcher::new(Arc::new(client))
    }

    fn call<'a>(base_url: &'a str, method: Method, specs: &'a [ParamSpec], values: &'a Map<String, Value>) -> ProxyCall<'a> {
        ProxyCall {
            endpoint: REST_ENDPOINT,
            method,
            function: Some("core_webservice_get_site_info"),
            specs,
            values,
            base_url,
            token: Some("abc123"),
        }
    }

    #[tokio::test]
    async fn test_site_info_sends_exactly_protocol_fields() {
        let (base, seen) = mock_moodle().await;
        let values = Map::new();
        let outcome = dispatcher().dispatch(call(&base, Method::GET, &[], &values)).await.unwrap();

        assert_eq!(outcome.payload, UpstreamPayload::Json(json!({"sitename": "Test Moodle"})));
        assert_eq!(outcome.method, Method::GET);
        assert!(outcome.direct_url.starts_with(&format!("{}/webservice/rest/server.php?", base)));

        let seen = seen.lock().await;
        let (method, params) = &seen[0];
        assert_eq!(method, "GET");
        assert_eq!(
            params,
            &vec![
                ("wstoken".to_string(), "abc123".to_string()),
                ("wsfunction".to_string(), "core_webservice_get_site_info".to_string()),
                ("moodlewsrestformat".to_string(), "json".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_post_uses_form_body_and_encodes_lists() {
        let (base, seen) = mock_moodle().await;
        let specs = vec![
            ParamSpec::new("courseids", ParamType::List),
            ParamSpec::new("visible", ParamType::Bool),
        ];
        let mut values = Map::new();
        values.insert("courseids".into(), json!("3,5"));
        values.insert("visible".into(), json!("yes"));

        dispatcher().dispatch(call(&base, Method::POST, &specs, &values)).await.unwrap();

        let seen = seen.lock().await;
        let (method, params) = &seen[0];
        assert_eq!(method, "POST");
        assert!(params.contains(&("courseids[0]".to_string(), "3".to_string())));
        assert!(params.contains(&("courseids[1]".to_string(), "5".to_string())));
        assert!(params.contains(&("visible".to_string(), "1".to_string())));
    }

    #[tokio::test]
    async fn test_upstream_error_keeps_status_and_body() {
        let (base, _) = mock_moodle().await;
        let values: Map<String, Value> = [("wsfunction".to_string(), json!("broken"))].into_iter().collect();
        let specs = vec![ParamSpec::new("wsfunction", ParamType::Str)];

        match dispatcher().dispatch(call(&base, Method::GET, &specs, &values)).await {
            Err(ProxyError::Upstream { status, detail }) => {
                assert_eq!(status, 500);
                assert_eq!(detail, json!({"exception": "moodle_exception"}));
            }
            other => panic!("unexpected result: {:?}", other.map(|o| o.payload)),
        }

        let values: Map<String, Value> = [("wsfunction".to_string(), json!("plain"))].into_iter().collect();
        match dispatcher().dispatch(call(&base, Method::GET, &specs, &values)).await {
            Err(ProxyError::Upstream { status, detail }) => {
                assert_eq!(status, 403);
                assert_eq!(detail, json!("access denied"));
            }
            other => panic!("unexpected result: {:?}", other.map(|o| o.payload)),
        }
    }

    #[tokio::test]
    async fn test_non_json_success_is_text() {
        let (base, _) = mock_moodle().await;
        let values: Map<String, Value> = [("wsfunction".to_string(), json!("text"))].into_iter().collect();
        let specs = vec![ParamSpec::new("wsfunction", ParamType::Str)];

        let outcome = dispatcher().dispatch(call(&base, Method::GET, &specs, &values)).await.unwrap();
        assert_eq!(outcome.payload, UpstreamPayload::Text("not json at all".into()));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let values = Map::new();
        let result = dispatcher().dispatch(call(&base, Method::GET, &[], &values)).await;
        assert!(matches!(result, Err(ProxyError::Connection { .. })));
    }

    #[test]
    fn test_build_params_rules() {
        let specs = vec![
            ParamSpec::new("criteria", ParamType::List),
            ParamSpec {
                send_if_empty: true,
                ..ParamSpec::new("search", ParamType::Str)
            },
            ParamSpec {
                default: Some(json!(25)),
                ..ParamSpec::new("perpage", ParamType::Int)
            },
            ParamSpec::new("skipped", ParamType::Str),
        ];
        let mut values = Map::new();
        values.insert("criteria".into(), json!([{"key": "email", "value": "a@b.c"}]));
        values.insert("skipped".into(), json!(""));

        let call = ProxyCall {
            endpoint: REST_ENDPOINT,
            method: Method::GET,
            function: Some("core_user_get_users"),
            specs: &specs,
            values: &values,
            base_url: "moodle.example.com",
            token: None,
        };
        let params = ProxyDispatcher::build_params(&call).unwrap();

        assert_eq!(
            Value::Object(params),
            json!({
                "criteria[0][key]": "email",
                "criteria[0][value]": "a@b.c",
                "search": "",
                "perpage": 25,
                "wsfunction": "core_user_get_users",
                "moodlewsrestformat": "json"
            })
        );
    }

    #[test]
    fn test_caller_protocol_fields_are_kept() {
        let specs = vec![
            ParamSpec::new("wsfunction", ParamType::Str),
            ParamSpec::new("moodlewsrestformat", ParamType::Str),
        ];
        let mut values = Map::new();
        values.insert("wsfunction".into(), json!("core_course_get_courses"));
        values.insert("moodlewsrestformat".into(), json!("xml"));

        let params = ProxyDispatcher::build_params(&ProxyCall {
            endpoint: REST_ENDPOINT,
            method: Method::GET,
            function: Some("core_webservice_get_site_info"),
            specs: &specs,
            values: &values,
            base_url: "m",
            token: Some("t"),
        })
        .unwrap();

        assert_eq!(params["wsfunction"], json!("core_course_get_courses"));
        assert_eq!(params["moodlewsrestformat"], json!("xml"));
        assert_eq!(params["wstoken"], json!("t"));
    }

    #[test]
    fn test_auth_endpoint_never_gets_wstoken() {
        let specs = vec![ParamSpec::new("username", ParamType::Str).required()];
        let mut values = Map::new();
        values.insert("username".into(), json!("student"));

        let params = ProxyDispatcher::build_params(&ProxyCall {
            endpoint: AUTH_ENDPOINT,
            method: Method::POST,
            function: None,
            specs: &specs,
            values: &values,
            base_url: "m",
            token: Some("t"),
        })
        .unwrap();
        assert_eq!(Value::Object(params), json!({"username": "student"}));

        let empty = Map::new();
        let missing = ProxyDispatcher::build_params(&ProxyCall {
            endpoint: AUTH_ENDPOINT,
            method: Method::POST,
            function: None,
            specs: &specs,
            values: &empty,
            base_url: "m",
            token: None,
        });
        assert!(matches!(missing, Err(ProxyError::BadRequest(_))));
    }

    #[test]
    fn test_base_url_handling() {
        assert_eq!(normalize_base_url("moodle.example.com/"), "https://moodle.example.com");
        assert_eq!(normalize_base_url("HTTP://local:8080"), "HTTP://local:8080");
        assert_eq!(
            endpoint_url("moodle.example.com", "login/token.php"),
            "https://moodle.example.com/login/token.php"
        );

        assert_eq!(
            resolve_base_url(Some("https://fixed.example"), Some("other.example")).unwrap(),
            "https://fixed.example"
        );
        assert_eq!(resolve_base_url(None, Some("other.example")).unwrap(), "https://other.example");
        assert!(matches!(resolve_base_url(None, Some("  ")), Err(ProxyError::Configuration(_))));
    }

    #[test]
    fn test_bearer_wins_over_query_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(resolve_token(&headers, Some(" q ")), Some("q".to_string()));
        assert_eq!(resolve_token(&headers, None), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer hdr"));
        assert_eq!(resolve_token(&headers, Some("q")), Some("hdr".to_string()));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(resolve_token(&headers, Some("q")), Some("q".to_string()));
    }
}
