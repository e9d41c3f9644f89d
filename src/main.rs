use anyhow::Context;
use homewizard_bridge::{config::Config, logging, service::MeterService};
use tracing::{info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config_path = Config::default_path()?;
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let log_dir = config_path
        .parent()
        .map(|dir| dir.to_path_buf())
        .unwrap_or_else(|| ".".into());
    let _log_guard = logging::init(config.log_level, &log_dir)?;
    if let Some(name) = &config.unknown_log_level {
        warn!("Unknown LogLevel '{name}', using INFO");
    }

    info!("Start");
    let (service, _bus) = MeterService::start(config)
        .await
        .context("startup failed")?;

    service.run().await;
    Ok(())
}
