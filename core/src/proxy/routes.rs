//! Route table
//! Declarative description of the proxied web-service functions, loaded from
//! an endpoints file and turned into axum routes

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::Router;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::proxy::dispatcher::ParamSpec;
use crate::proxy::handlers::endpoints::handle_endpoint;
use crate::proxy::server::AppState;

/// Paths served by the proxy itself
pub const RESERVED_PATHS: &[&str] = &[
    "/health",
    "/healthz",
    "/api/secure/login",
    "/api/secure/logout",
    "/api/secure/check",
    "/office/generate-token",
    "/office/file",
];

/// One entry of the endpoints file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionConfig {
    /// Web-service function, e.g. `core_webservice_get_site_info`
    pub function: String,
    /// Route exposed by the proxy
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub query_params: Vec<ParamSpec>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Upstream endpoint path -> functions served through it
pub type EndpointMap = BTreeMap<String, Vec<FunctionConfig>>;

#[derive(Debug, Clone, Serialize)]
pub struct RouteDescriptor {
    pub function: String,
    pub path: String,
    #[serde(serialize_with = "serialize_method")]
    pub method: Method,
    /// Upstream endpoint, always with a leading slash
    pub endpoint: String,
    pub description: String,
    pub tags: Vec<String>,
    pub params: Vec<ParamSpec>,
}

fn serialize_method<S: serde::Serializer>(method: &Method, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(method.as_str())
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<RouteDescriptor>>,
}

impl RouteTable {
    pub fn from_endpoint_map(map: EndpointMap) -> anyhow::Result<Self> {
        let mut routes = Vec::new();
        let mut seen = HashSet::new();

        for (endpoint, functions) in map {
            let endpoint = with_leading_slash(&endpoint);
            for config in functions {
                let method = Method::from_bytes(config.method.trim().to_uppercase().as_bytes())
                    .with_context(|| format!("Invalid method {:?} for {}", config.method, config.function))?;
                let path = with_leading_slash(&config.path);

                if RESERVED_PATHS.contains(&path.as_str()) || path.starts_with("/files/") {
                    anyhow::bail!("Route {} for {} collides with a built-in route", path, config.function);
                }
                if !seen.insert((path.clone(), method.clone())) {
                    anyhow::bail!("Duplicate route {} {}", method, path);
                }

                tracing::debug!("Registering {} {} -> {}{}", method, path, endpoint, config.function);
                routes.push(Arc::new(RouteDescriptor {
                    function: config.function,
                    path,
                    method,
                    endpoint: endpoint.clone(),
                    description: config.description,
                    tags: config.tags,
                    params: config.query_params,
                }));
            }
        }

        Ok(Self { routes })
    }

    /// Load an endpoints file (JSON object of endpoint -> function list)
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Endpoints file not found: {:?}", path))?;
        let map: EndpointMap = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in endpoints file: {:?}", path))?;
        let table = Self::from_endpoint_map(map)?;
        tracing::info!("Loaded {} proxied functions from {:?}", table.len(), path);
        Ok(table)
    }

    pub fn routes(&self) -> &[Arc<RouteDescriptor>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Axum routes for every declared function
    pub fn router(&self) -> anyhow::Result<Router<AppState>> {
        let mut by_path: BTreeMap<&str, MethodRouter<AppState>> = BTreeMap::new();

        for descriptor in &self.routes {
            let filter = MethodFilter::try_from(descriptor.method.clone())
                .map_err(|_| anyhow::anyhow!("Unsupported method {} for {}", descriptor.method, descriptor.path))?;

            let route = descriptor.clone();
            let handler = move |State(state): State<AppState>,
                                headers: HeaderMap,
                                Query(query): Query<Vec<(String, String)>>,
                                body: Bytes| {
                let route = route.clone();
                async move { handle_endpoint(route, state, headers, query, body).await }
            };

            let method_router = match by_path.remove(descriptor.path.as_str()) {
                Some(existing) => existing.on(filter, handler),
                None => on(filter, handler),
            };
            by_path.insert(descriptor.path.as_str(), method_router);
        }

        Ok(by_path
            .into_iter()
            .fold(Router::new(), |router, (path, method_router)| router.route(path, method_router)))
    }
}

fn with_leading_slash(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamType;

    const ENDPOINTS: &str = r#"{
        "/webservice/rest/server.php": [
            {
                "function": "core_webservice_get_site_info",
                "path": "/core/webservice/get_site_info",
                "description": "Site info",
                "tags": ["core"],
                "query_params": []
            },
            {
                "function": "core_course_get_courses",
                "path": "core/course/get_courses",
                "method": "post",
                "query_params": [
                    {"name": "options", "type": "dict", "required": false, "description": "Filter"},
                    {"name": "ids", "type": "list", "required": true, "description": "Course ids", "send_if_empty": false}
                ]
            }
        ],
        "login/token.php": [
            {
                "function": "login_token",
                "path": "/auth/token",
                "method": "POST",
                "query_params": [
                    {"name": "username", "type": "str", "required": true, "description": ""}
                ]
            }
        ]
    }"#;

    #[test]
    fn test_from_endpoint_map() {
        let map: EndpointMap = serde_json::from_str(ENDPOINTS).unwrap();
        let table = RouteTable::from_endpoint_map(map).unwrap();
        assert_eq!(table.len(), 3);

        let courses = table
            .routes()
            .iter()
            .find(|r| r.function == "core_course_get_courses")
            .unwrap();
        assert_eq!(courses.path, "/core/course/get_courses");
        assert_eq!(courses.method, Method::POST);
        assert_eq!(courses.endpoint, "/webservice/rest/server.php");
        assert_eq!(courses.params[0].param_type, ParamType::Dict);
        assert!(courses.params[1].required);

        let login = table.routes().iter().find(|r| r.function == "login_token").unwrap();
        assert_eq!(login.endpoint, "/login/token.php");
    }

    #[test]
    fn test_router_builds() {
        let map: EndpointMap = serde_json::from_str(ENDPOINTS).unwrap();
        let table = RouteTable::from_endpoint_map(map).unwrap();
        assert!(table.router().is_ok());
    }

    #[test]
    fn test_conflicts_are_rejected() {
        let dup = r#"{
            "/webservice/rest/server.php": [
                {"function": "a", "path": "/x"},
                {"function": "b", "path": "/x", "method": "get"}
            ]
        }"#;
        let map: EndpointMap = serde_json::from_str(dup).unwrap();
        assert!(RouteTable::from_endpoint_map(map).is_err());

        let reserved = r#"{"/webservice/rest/server.php": [{"function": "a", "path": "/health"}]}"#;
        let map: EndpointMap = serde_json::from_str(reserved).unwrap();
        assert!(RouteTable::from_endpoint_map(map).is_err());

        let same_path = r#"{
            "/webservice/rest/server.php": [
                {"function": "a", "path": "/x"},
                {"function": "b", "path": "/x", "method": "POST"}
            ]
        }"#;
        let map: EndpointMap = serde_json::from_str(same_path).unwrap();
        assert!(RouteTable::from_endpoint_map(map).unwrap().router().is_ok());
    }
}
