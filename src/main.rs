// Thin operational binary: load configuration, bind the configured backend,
// run its healthcheck and exit non-zero when it fails.
use oauth2_ports::Backend;
use rust_oauth2_backend::{config::Config, telemetry, Dispatcher};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::default();
    let guard = telemetry::init_telemetry(&config.telemetry_or_default().service_name)?;

    tracing::info!(config = ?config.sanitized(), "loaded configuration");

    let dispatcher = Dispatcher::from_config(&config).await?;
    let result = dispatcher.healthcheck().await;
    match &result {
        Ok(()) => tracing::info!("backend healthy"),
        Err(e) => tracing::error!(code = e.code(), "backend healthcheck failed: {}", e),
    }

    guard.shutdown()?;
    result.map_err(Into::into)
}
