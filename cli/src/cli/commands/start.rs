use moodleware_core::config::{expand_path, Config};
use moodleware_core::proxy::{ProxyServer, RouteTable};

pub async fn run(mut config: Config) -> anyhow::Result<()> {
    config.moodle.endpoints_file = expand_path(&config.moodle.endpoints_file);

    tracing::info!("Starting Moodleware...");
    tracing::info!("  Port: {}", config.server.port);
    tracing::info!("  Host: {}", config.server.bind_host());
    tracing::info!("  Endpoints file: {:?}", config.moodle.endpoints_file);

    let routes = RouteTable::load(&config.moodle.endpoints_file)?;
    if routes.is_empty() {
        tracing::warn!("Endpoints file declares no functions; only built-in routes are served.");
    }

    // Create and start server
    let server = ProxyServer::new(&config, routes)?;

    tracing::info!("Proxy server starting on http://{}:{}", config.server.bind_host(), config.server.port);
    tracing::info!("Press Ctrl+C to stop");

    // Run server (blocks until shutdown)
    server.run().await?;

    Ok(())
}
