use std::sync::Arc;
use std::time::Duration;

use sitemap_server::logger::init_logger;
use sitemap_server::prelude::*;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();

    info!("Starting sitemap server");

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let plugin_manager = Arc::new(PluginManager::new());

    let catalog: Arc<dyn Catalog> = Arc::new(JsonFileCatalog::new(&config.catalog.path));
    let sitemap = Arc::new(SitemapPlugin::new(catalog, config.sitemap.clone()));
    let security = Arc::new(SecurityPlugin::new(&config.security.allowed_origins));

    plugin_manager.register_plugin(sitemap.clone()).await?;
    plugin_manager.register_plugin(security.clone()).await?;

    let cleaner = CacheCleaner::new(sitemap.clone(), config.cleanup.interval()).start();
    let health = start_health_check(plugin_manager.clone());

    let router = Router::new(
        config.server.sitemap_path.clone(),
        sitemap,
        security,
        plugin_manager.clone(),
    );
    let server = SitemapServer::new(config.bind_addr()?, router);
    let (addr, server_task) = server.start(wait_for_shutdown())?;
    info!("Serving {} on http://{}", config.server.sitemap_path, addr);

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Server exited with error: {}", e),
        Err(e) => error!("Server task panicked: {}", e),
    }

    info!("Shutting down...");
    cleaner.abort();
    health.abort();
    if let Err(e) = plugin_manager.cleanup().await {
        error!("Error during shutdown: {}", e);
    }
    info!("Shutdown complete");

    Ok(())
}

fn start_health_check(plugin_manager: Arc<PluginManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(HEALTH_LOG_INTERVAL).await;
            let health_status = plugin_manager.health_check().await;
            if health_status.values().all(|ok| *ok) {
                info!("Plugin health status: {:?}", health_status);
            } else {
                warn!("Plugin health status: {:?}", health_status);
            }
        }
    })
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
