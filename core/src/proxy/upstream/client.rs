//! Upstream client for calling the Moodle web-service endpoints

use reqwest::{Client, Method, Response, Url};
use tokio::time::Duration;

#[derive(Clone)]
pub struct UpstreamClient {
    http_client: Client,
    file_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(
        request_timeout: Duration,
        file_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(request_timeout)
            .user_agent(concat!("moodleware/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http_client,
            file_timeout,
        })
    }

    /// Methods whose parameters travel in the query string rather than a form body
    pub fn sends_query(method: &Method) -> bool {
        matches!(
            *method,
            Method::GET | Method::HEAD | Method::DELETE | Method::OPTIONS
        )
    }

    /// Reproducible URL for a call, parameters included
    pub fn build_url(url: &str, params: &[(String, String)]) -> String {
        if params.is_empty() {
            return url.to_string();
        }
        match Url::parse_with_params(url, params) {
            Ok(full) => full.to_string(),
            Err(_) => url.to_string(),
        }
    }

    /// Call a web-service endpoint with already-encoded parameters
    pub async fn call(
        &self,
        method: Method,
        url: &str,
        params: &[(String, String)],
    ) -> Result<Response, reqwest::Error> {
        let request = if Self::sends_query(&method) {
            self.http_client.request(method, url).query(params)
        } else {
            self.http_client.request(method, url).form(params)
        };
        request.send().await
    }

    /// Fetch a pluginfile resource using token authentication
    pub async fn fetch_file(&self, url: &str, token: &str) -> Result<Response, reqwest::Error> {
        self.http_client
            .get(url)
            .query(&[("token", token)])
            .timeout(self.file_timeout)
            .send()
            .await
    }
}
