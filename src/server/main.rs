use clap::Parser;
use omniverse::server::{RelayConfig, RelayServer};
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = RelayConfig::parse();

    #[cfg(feature = "telemetry")]
    omniverse::server::telemetry::init_telemetry()?;
    #[cfg(not(feature = "telemetry"))]
    omniverse::server::init_tracing(config.json_logs)?;

    let server = RelayServer::bind(&config).await?;
    let result = server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    #[cfg(feature = "telemetry")]
    omniverse::server::telemetry::shutdown_telemetry();

    result.map_err(Into::into)
}
