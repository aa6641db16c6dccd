//! Session cookie helpers

use axum::http::{header, HeaderMap};

#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    pub max_age: u64,
    /// Add the `Secure` attribute (production deployments behind TLS)
    pub secure: bool,
}

impl CookieSettings {
    /// `Set-Cookie` value carrying a signed session envelope
    pub fn session_cookie(&self, value: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
            self.name,
            value,
            self.max_age,
            self.secure_attr(),
        )
    }

    /// `Set-Cookie` value that makes the browser drop the session cookie
    pub fn cleared_cookie(&self) -> String {
        format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{}",
            self.name,
            self.secure_attr(),
        )
    }

    fn secure_attr(&self) -> &'static str {
        if self.secure {
            "; Secure"
        } else {
            ""
        }
    }
}

/// Value of the named cookie across all `Cookie` headers
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .map(str::trim)
        .find_map(|cookie| cookie.strip_prefix(&prefix))
        .map(|value| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}
