use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use certivo_media::{FaceDetector, OnnxFaceMesh};
use tracing_subscriber::EnvFilter;

mod config;
mod credential;
mod device_trust;
mod engine;
mod http;
mod rate_limiter;
mod store;
#[cfg(test)]
mod testing;

use config::Config;
use device_trust::FixedDeviceTrust;
use rate_limiter::{RateLimiter, RateLimits};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("certivod starting");

    let config = Config::from_env().context("invalid configuration")?;

    if let Some(expected) = &config.model_sha256 {
        certivo_media::verify_model(&config.model_path, expected)
            .context("face mesh model failed integrity check")?;
    }
    let mut model = OnnxFaceMesh::load(
        &config.model_path,
        config.liveness.detection_confidence,
        config.liveness.tracking_confidence,
    )
    .context("failed to load face mesh model")?;
    if config.detector_path.exists() {
        let detector =
            FaceDetector::load(&config.detector_path, config.liveness.detection_confidence)
                .context("failed to load face detector model")?;
        model = model.with_detector(detector);
    } else {
        tracing::warn!(
            path = %config.detector_path.display(),
            "face detector not found, running the mesh on whole frames"
        );
    }

    let engine = engine::spawn_engine(model, config.liveness.clone())?;
    let store = store::DeviceStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open {}", config.db_path.display()))?;
    let tokens = credential::TokenIssuer::from_key_file(&config.token_key_path, config.token_ttl_secs)
        .context("failed to load token signing key")?;

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("failed to create {}", config.upload_dir.display()))?;

    tracing::info!(
        devices = store.count_all().await?,
        db = %config.db_path.display(),
        "device store opened"
    );

    let state = Arc::new(http::AppState {
        engine,
        store,
        tokens,
        trust: Box::new(FixedDeviceTrust(config.device_trust_score)),
        limiter: Mutex::new(RateLimiter::new(RateLimits::default())),
        upload_dir: config.upload_dir.clone(),
        verify_timeout: Duration::from_secs(config.verify_timeout_secs),
        thresholds: config.liveness.request,
    });
    let app = http::router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "certivod ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("certivod shutting down");
    Ok(())
}
