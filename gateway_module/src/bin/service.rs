use gateway_module::service::{run_server, ServiceConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();
    dotenvy::dotenv().ok();

    let config = ServiceConfig::from_env()?;
    info!(
        "starting support mail service host={} port={} backend={:?}",
        config.host, config.port, config.store_backend
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };

    run_server(config, shutdown).await
}
