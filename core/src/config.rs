use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const LOCAL_CONFIG: &str = "moodleware.toml";

/// Moodleware configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub moodle: MoodleConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub office: OfficeConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub allow_lan_access: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allow_lan_access: false,
        }
    }
}

impl ServerConfig {
    pub fn bind_host(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            &self.host
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoodleConfig {
    /// Fixed Moodle instance. `""` or `"*"` lets callers pass `moodle_url`.
    #[serde(default)]
    pub url: String,

    /// JSON file describing the proxied web-service functions
    #[serde(default = "default_endpoints_file")]
    pub endpoints_file: PathBuf,
}

impl Default for MoodleConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            endpoints_file: default_endpoints_file(),
        }
    }
}

impl MoodleConfig {
    /// Configured base URL, or `None` when callers must supply one
    pub fn fixed_url(&self) -> Option<&str> {
        match self.url.trim() {
            "" | "*" => None,
            url => Some(url),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// HMAC key for session envelopes; generated at startup when empty
    #[serde(default)]
    pub secret_key: String,

    #[serde(default = "default_session_max_age")]
    pub max_age: u64,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    #[serde(default)]
    pub secure_cookies: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            max_age: default_session_max_age(),
            cookie_name: default_cookie_name(),
            secure_cookies: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficeConfig {
    #[serde(default = "default_token_ttl")]
    pub token_ttl: u64,
}

impl Default for OfficeConfig {
    fn default() -> Self {
        Self {
            token_ttl: default_token_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    #[serde(default = "default_file_timeout")]
    pub file_timeout: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            file_timeout: default_file_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Login attempts per client, e.g. "10/minute"
    #[serde(default = "default_login_rate")]
    pub login: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: default_login_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_port() -> u16 { 8000 }
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_endpoints_file() -> PathBuf { PathBuf::from("endpoints.json") }
fn default_session_max_age() -> u64 { 14400 }
fn default_cookie_name() -> String { "mng_session".to_string() }
fn default_token_ttl() -> u64 { 60 }
fn default_request_timeout() -> u64 { 30 }
fn default_file_timeout() -> u64 { 60 }
fn default_login_rate() -> String { "10/minute".to_string() }
fn default_log_level() -> String { "info".to_string() }

/// Get default config file path
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("moodleware")
        .join("config.toml")
}

/// File `load_config` reads for the given `--config` value, if any
pub fn resolve_config_path(path: Option<&Path>) -> Option<PathBuf> {
    resolve_config_path_in(path, Path::new(LOCAL_CONFIG), &default_config_path())
}

fn resolve_config_path_in(path: Option<&Path>, local: &Path, default: &Path) -> Option<PathBuf> {
    if let Some(path) = path {
        return Some(path.to_path_buf());
    }
    [local, default]
        .into_iter()
        .find(|candidate| candidate.exists())
        .map(Path::to_path_buf)
}

/// Load config from file, or return defaults if not found, then apply
/// environment overrides.
///
/// Loading order:
/// 1. Specified path (if provided)
/// 2. ./moodleware.toml (if exists)
/// 3. default_config_path() (usually ~/.config/moodleware/config.toml)
pub fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let mut config = read_config_file(path)?;
    config.apply_env_overrides(|name| std::env::var(name).ok());
    Ok(config)
}

fn read_config_file(path: Option<PathBuf>) -> anyhow::Result<Config> {
    if let Some(config_path) = path {
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            tracing::info!("Loaded config from specified path {:?}", config_path);
            return Ok(config);
        } else {
            anyhow::bail!("Specified config file not found: {:?}", config_path);
        }
    }

    let local_config = PathBuf::from(LOCAL_CONFIG);
    if local_config.exists() {
        match std::fs::read_to_string(&local_config) {
            Ok(content) => match toml::from_str::<Config>(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from current directory {:?}", local_config);
                    return Ok(config);
                }
                Err(e) => {
                    tracing::error!("Failed to parse ./moodleware.toml: {}. Falling back to default path.", e);
                }
            },
            Err(e) => {
                tracing::error!("Failed to read ./moodleware.toml: {}. Falling back to default path.", e);
            }
        }
    }

    let default_path = default_config_path();
    if default_path.exists() {
        let content = std::fs::read_to_string(&default_path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::info!("Loaded config from default path {:?}", default_path);
        Ok(config)
    } else {
        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }
}

impl Config {
    /// Environment variables win over file values
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("MOODLE_URL") {
            self.moodle.url = url;
        }
        if let Some(secret) = var("SECRET_KEY") {
            self.session.secret_key = secret;
        }
        if let Some(max_age) = var("SESSION_MAX_AGE") {
            match max_age.trim().parse() {
                Ok(secs) => self.session.max_age = secs,
                Err(_) => tracing::warn!("Ignoring invalid SESSION_MAX_AGE={:?}", max_age),
            }
        }
        if let Some(rate) = var("LOGIN_RATE_LIMIT") {
            self.rate_limit.login = rate;
        }
        if var("ENVIRONMENT").as_deref() == Some("production") {
            self.session.secure_cookies = true;
        }
    }
}

/// Expand ~ in path to home directory
pub fn expand_path(path: &PathBuf) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(rest) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
    }
    path.clone()
}
