use clap::Parser;

mod cli;

use cli::{Cli, Commands};
use moodleware_core::config::load_config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // No config or logging needed to print a secret
    if matches!(cli.command, Commands::GenerateSecret) {
        cli::commands::generate_secret::run();
        return Ok(());
    }

    let mut config = load_config(cli.config.clone())?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&config.logging.level, std::env::var("RUST_LOG").ok()))
        .init();

    match cli.command {
        Commands::Start { port, endpoints } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(endpoints) = endpoints {
                config.moodle.endpoints_file = endpoints;
            }
            cli::commands::start::run(config).await?;
        }
        Commands::Routes { endpoints } => {
            if let Some(endpoints) = endpoints {
                config.moodle.endpoints_file = endpoints;
            }
            cli::commands::routes::run(&config)?;
        }
        Commands::Status => {
            cli::commands::status::run(&config, cli.config.as_deref()).await?;
        }
        Commands::GenerateSecret => {}
    }

    Ok(())
}

/// A parseable `RUST_LOG` replaces the configured level entirely
fn log_filter(level: &str, rust_log: Option<String>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| {
            EnvFilter::new(format!(
                "moodleware={level},moodleware_core={level},tower_http=debug"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_prefers_rust_log() {
        let filter = log_filter("info", Some("moodleware_core=trace".to_string())).to_string();
        assert!(filter.contains("moodleware_core=trace"));
        assert!(!filter.contains("moodleware=info"));
    }

    #[test]
    fn test_log_filter_uses_configured_level() {
        let filter = log_filter("warn", None).to_string();
        assert!(filter.contains("moodleware=warn"));
        assert!(filter.contains("moodleware_core=warn"));
        assert!(filter.contains("tower_http=debug"));
    }
}
