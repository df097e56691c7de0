use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::{AnalyzerService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("miend starting");

    let config = Config::load()?;
    tracing::info!(
        model_dir = %config.pipeline.model_dir.display(),
        variant = ?config.pipeline.variant,
        bus = ?config.bus,
        "configuration loaded"
    );

    // Loads every model before serving; any failure aborts startup
    let engine = engine::spawn_engine(&config.pipeline)?;

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AnalyzerService::new(engine))?
        .build()
        .await?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "miend ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("miend shutting down");

    Ok(())
}
