//! Proxy Server - Axum HTTP server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::one_time::OneTimeTokenService;
use crate::proxy::cookies::CookieSettings;
use crate::proxy::dispatcher::{normalize_base_url, ProxyDispatcher};
use crate::proxy::handlers::{auth, files, office};
use crate::proxy::rate_limit::LoginRateLimiter;
use crate::proxy::routes::RouteTable;
use crate::proxy::upstream::UpstreamClient;
use crate::session::{random_token, MemoryBackend, SessionStore, Signer};

const REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<ProxyDispatcher>,
    pub sessions: Arc<SessionStore>,
    pub one_time: Arc<OneTimeTokenService>,
    pub login_limiter: Arc<LoginRateLimiter>,
    pub cookies: Arc<CookieSettings>,
    /// Fixed Moodle instance; `None` lets callers choose with `moodle_url`
    pub moodle_url: Option<String>,
}

/// Proxy server instance
pub struct ProxyServer {
    host: String,
    port: u16,
    backend: Arc<MemoryBackend>,
    routes: RouteTable,
    state: AppState,
}

impl ProxyServer {
    pub fn new(config: &Config, routes: RouteTable) -> anyhow::Result<Self> {
        let upstream = UpstreamClient::new(
            Duration::from_secs(config.timeouts.request_timeout),
            Duration::from_secs(config.timeouts.file_timeout),
        )?;

        let secret = if config.session.secret_key.trim().is_empty() {
            tracing::warn!("No session secret configured; generated a random one. Sessions will not survive a restart.");
            random_token()
        } else {
            config.session.secret_key.clone()
        };

        let login_limiter = LoginRateLimiter::from_spec(&config.rate_limit.login).ok_or_else(|| {
            anyhow::anyhow!("Invalid login rate limit {:?} (expected e.g. \"10/minute\")", config.rate_limit.login)
        })?;

        let backend = Arc::new(MemoryBackend::new());
        let max_age = Duration::from_secs(config.session.max_age);
        let sessions = SessionStore::new(backend.clone(), Signer::new(&secret), max_age);
        let one_time = OneTimeTokenService::new(backend.clone(), Duration::from_secs(config.office.token_ttl));

        let state = AppState {
            dispatcher: Arc::new(ProxyDispatcher::new(Arc::new(upstream))),
            sessions: Arc::new(sessions),
            one_time: Arc::new(one_time),
            login_limiter: Arc::new(login_limiter),
            cookies: Arc::new(CookieSettings {
                name: config.session.cookie_name.clone(),
                max_age: config.session.max_age,
                secure: config.session.secure_cookies,
            }),
            moodle_url: config.moodle.fixed_url().map(normalize_base_url),
        };

        Ok(Self {
            host: config.server.bind_host().to_string(),
            port: config.server.port,
            backend,
            routes,
            state,
        })
    }

    /// Full application router: built-in routes plus the declared functions
    pub fn router(&self) -> anyhow::Result<Router> {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = Router::new()
            // Health check
            .route("/healthz", get(health_check_handler))
            .route("/health", get(health_check_handler))

            // Cookie sessions
            .route("/api/secure/login", post(auth::handle_login))
            .route("/api/secure/logout", post(auth::handle_logout))
            .route("/api/secure/check", get(auth::handle_check))

            // Files
            .route("/files/*path", get(files::handle_file))
            .route("/office/generate-token", post(office::handle_generate_token))
            .route("/office/file", get(office::handle_file))

            .merge(self.routes.router()?)
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone());

        Ok(app)
    }

    /// Run the proxy server (blocking)
    pub async fn run(self) -> anyhow::Result<()> {
        let app = self.router()?;

        let reaper = self.backend.spawn_reaper(REAPER_INTERVAL);
        let limiter = self.state.login_limiter.clone();
        let limiter_cleanup = tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAPER_INTERVAL);
            loop {
                interval.tick().await;
                let removed = limiter.cleanup_expired();
                if removed > 0 {
                    tracing::debug!("Dropped {} expired login rate windows", removed);
                }
            }
        });

        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        tracing::info!("Moodleware listening on {}", addr);
        match &self.state.moodle_url {
            Some(url) => tracing::info!("Proxying to {}", url),
            None => tracing::info!("No fixed Moodle URL, callers must pass moodle_url"),
        }

        // Handle graceful shutdown
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        reaper.abort();
        limiter_cleanup.abort();
        tracing::info!("Moodleware stopped");
        Ok(())
    }
}

/// Health check handler
async fn health_check_handler(State(state): State<AppState>) -> Response {
    let stats = state.sessions.stats().await;
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": stats,
        })),
    )
        .into_response()
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
