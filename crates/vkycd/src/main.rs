use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod store;

use config::Config;
use dbus_interface::{VerifierService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("vkycd starting");

    let config = Config::load().context("loading configuration")?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        db_path = %config.db_path.display(),
        max_frames = config.max_frames,
        workers = config.engine_workers,
        "configuration loaded"
    );

    let models = vkyc_models::load_models(&config.model_dir, config.smile_ratio)
        .context("loading face models")?;

    let store = store::KycStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    tracing::info!(records = store.count_records().await?, "record store opened");

    let engine = engine::spawn_engine(models, config.verify_options(), config.engine_workers)?;

    let session_bus = config.session_bus;
    let service = VerifierService::new(config, engine, store);
    let builder = if session_bus {
        tracing::warn!("serving on the session bus (development mode)");
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on D-Bus")?;

    tracing::info!(bus_name = BUS_NAME, path = OBJECT_PATH, "vkycd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("vkycd shutting down");

    Ok(())
}
