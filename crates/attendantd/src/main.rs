use anyhow::{Context, Result};
use attendant_core::{AttendanceSession, IdentityTable, OnnxLoader};
use attendant_hw::V4lCamera;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod detection_loop;
mod engine;
mod pipeline;
mod session;

use config::Config;
use dbus_interface::{AttendantService, BUS_NAME, OBJECT_PATH};
use pipeline::{Pipeline, PipelineSettings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("attendantd starting");

    let config = Config::from_env();

    let identities = match &config.identities_path {
        Some(path) => IdentityTable::load(path)
            .with_context(|| format!("failed to load identities from {}", path.display()))?,
        None => IdentityTable::builtin(),
    };
    tracing::info!(
        identities = identities.len(),
        threshold = config.confidence_threshold,
        interval_ms = config.classify_interval_ms,
        "identity table ready"
    );

    let session = session::spawn_session(AttendanceSession::new(config.session_policy()));

    let (pipeline, readiness) = Pipeline::new(
        PipelineSettings {
            identities: Arc::new(identities),
            threshold: config.confidence_threshold,
            classify_interval: config.classify_interval(),
            skip_dark_frames: config.skip_dark_frames,
            model: config.model_location(),
        },
        session.clone(),
    );

    let cancel = CancellationToken::new();
    let camera = V4lCamera::new(config.capture_settings());
    let pipeline_task = tokio::spawn(pipeline.run(camera, OnnxLoader, cancel.clone()));

    let service = AttendantService::new(session, readiness);
    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "attendantd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("attendantd shutting down");

    cancel.cancel();
    match pipeline_task.await {
        Ok(exit) => tracing::info!(?exit, "pipeline stopped"),
        Err(e) => tracing::error!(error = %e, "pipeline task failed"),
    }

    Ok(())
}
