use std::path::Path;

use moodleware_core::config::{expand_path, resolve_config_path, Config};

pub async fn run(config: &Config, explicit_config: Option<&Path>) -> anyhow::Result<()> {
    println!("Moodleware Status");
    println!("=================");
    println!();
    println!("Configuration:");
    match resolve_config_path(explicit_config) {
        Some(path) => println!("  Config file: {:?}", path),
        None => println!("  Config file: (none, using defaults)"),
    }
    println!("  Endpoints file: {:?}", expand_path(&config.moodle.endpoints_file));
    println!("  Moodle URL: {}", config.moodle.fixed_url().unwrap_or("(supplied per request)"));
    println!();
    println!("Server settings:");
    println!("  Host: {}", config.server.bind_host());
    println!("  Port: {}", config.server.port);
    println!();
    println!("Sessions:");
    println!("  Max age: {}s", config.session.max_age);
    println!("  Cookie: {}", config.session.cookie_name);
    println!("  Secure cookies: {}", config.session.secure_cookies);
    println!("  Secret configured: {}", !config.session.secret_key.trim().is_empty());
    println!("  Login rate limit: {}", config.rate_limit.login);

    // Check if server is reachable
    println!();
    let host = match config.server.bind_host() {
        "0.0.0.0" => "127.0.0.1",
        host => host,
    };
    let url = format!("http://{}:{}/healthz", host, config.server.port);
    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => {
            println!("Server: RUNNING ✓");
            if let Ok(body) = resp.json::<serde_json::Value>().await {
                if let Some(active) = body.pointer("/sessions/active_sessions") {
                    println!("  Active sessions: {}", active);
                }
            }
        }
        _ => {
            println!("Server: NOT RUNNING");
        }
    }

    Ok(())
}
