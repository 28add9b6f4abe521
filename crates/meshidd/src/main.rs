use anyhow::Result;
use meshid_core::ReplayLandmarkSource;
use tracing_subscriber::EnvFilter;

mod camera;
mod config;
mod dbus_interface;
mod engine;
mod scheduler;
mod store;

use camera::StillImageCamera;
use config::Config;
use dbus_interface::{MeshIdService, BUS_NAME, OBJECT_PATH};
use engine::{EngineError, EngineSettings};
use store::SqliteTemplateStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("meshidd starting");

    let config = Config::load()?;
    tracing::info!(
        threshold = config.similarity_threshold,
        landmarks = config.landmark_count,
        refresh_hz = config.refresh_hz,
        db = %config.db_path.display(),
        "configuration loaded"
    );

    // Detector initialization is fatal: nothing works without landmarks.
    let landmarks_path = config.landmarks_path.to_string_lossy().into_owned();
    let detector = tokio::task::spawn_blocking(move || ReplayLandmarkSource::load(&landmarks_path))
        .await?
        .map_err(EngineError::ModelLoadFailure)?;

    let store = SqliteTemplateStore::open(&config.db_path)?;
    let camera = StillImageCamera::new(&config.camera_image);

    let engine = engine::spawn_engine(
        camera,
        detector,
        store,
        EngineSettings {
            threshold: config.similarity_threshold,
            landmark_count: config.landmark_count,
        },
    );

    let service = MeshIdService::new(engine.clone(), config.tick_interval());
    let _connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "meshidd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("meshidd shutting down");
    engine.stop_session().await?;

    Ok(())
}
