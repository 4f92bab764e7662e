use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use volto_core::{FaceProvider, Profile, Session, SqliteBlobStore};
use volto_vision::OnnxFaceProvider;

mod config;
mod dbus_interface;
mod engine;
mod kiosk;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("voltod starting");

    let config = config::Config::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        db_path = %config.db_path.display(),
        profile = %config.profile,
        "configuration loaded"
    );

    let profile = Profile::resolve(&config.profile)
        .with_context(|| format!("failed to load profile {:?}", config.profile))?;

    let backend = SqliteBlobStore::open(&config.db_path)
        .with_context(|| format!("failed to open store at {}", config.db_path.display()))?;
    let session = Session::open(backend, profile.clone())?;

    let provider: Result<Box<dyn FaceProvider + Send>, String> = match OnnxFaceProvider::load(
        &config.model_dir,
        &config.detector_model,
        &config.encoder_model,
        profile.descriptor_dim,
    ) {
        Ok(p) => {
            tracing::info!(
                detector = %config.detector_model,
                encoder = %config.encoder_model,
                "face models loaded"
            );
            Ok(Box::new(p))
        }
        Err(e) => {
            tracing::error!(error = %e, "face models failed to load; recognition is disabled");
            Err(e.to_string())
        }
    };
    let model_error = provider.as_ref().err().cloned();

    let engine = engine::spawn_engine(
        provider,
        engine::CaptureSettings {
            cameras: config.cameras.clone(),
            width: config.capture_width,
            height: config.capture_height,
        },
    );

    let kiosk = Arc::new(kiosk::Kiosk::new(
        session,
        engine,
        config.initial_facing,
        Duration::from_millis(config.frame_interval_ms),
        model_error,
    ));

    let service = dbus_interface::KioskService::new(Arc::clone(&kiosk));
    let _conn = zbus::connection::Builder::session()?
        .name("org.volto.Kiosk1")?
        .serve_at("/org/volto/Kiosk1", service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!("voltod ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("voltod shutting down");
    kiosk.stop_scan().await;

    Ok(())
}
