use anyhow::{Context, Result};
use rollcall_core::{AttendanceRecorder, FaceDetector, FaceRecognizer, RecognitionEngine};
use rollcall_hw::{LazyCamera, SerialThermometer};
use rollcall_store::Store;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod enroll;
mod http;
mod pipeline;
#[cfg(test)]
mod testing;

use config::Config;
use engine::{spawn_engine, Engine, EngineSettings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        camera = %config.camera_device,
        db = %config.db_path.display(),
        serial = %config.serial_port,
        "rollcalld starting"
    );

    let engine_store = Store::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    let http_store = Store::open(&config.db_path)?;

    let detector = FaceDetector::load(&config.detector_model_path())?;
    tracing::info!(path = %config.detector_model_path(), "live detector loaded");

    let enroll_detector = FaceDetector::load(&config.enroll_detector_model_path())?;
    tracing::info!(path = %config.enroll_detector_model_path(), "enrollment detector loaded");

    let recognizer = FaceRecognizer::load(&config.recognizer_model_path())?;
    tracing::info!(path = %config.recognizer_model_path(), "recognizer loaded");

    let recognition = RecognitionEngine::new(detector, recognizer)
        .with_tolerance(config.tolerance)
        .with_downscale(config.downscale);

    // The camera is opened by the first stream or enrollment request.
    let camera = LazyCamera::new(&config.camera_device, config.camera_width, config.camera_height);
    let sensor = SerialThermometer::new(&config.serial_port, config.serial_baud)
        .with_settle(config.sensor_settle)
        .with_timeout(config.sensor_timeout);
    let recorder = AttendanceRecorder::new(
        config.fever_threshold,
        chrono::Duration::seconds(config.debounce_secs),
    );

    let engine = Engine::new(
        camera,
        recognition,
        enroll_detector,
        sensor,
        engine_store,
        recorder,
        EngineSettings {
            jpeg_quality: config.jpeg_quality,
            enroll_samples: config.enroll_samples,
            enroll_jitters: config.enroll_jitters,
            enroll_max_frames: config.enroll_max_frames,
        },
    )?;
    let handle = spawn_engine(engine)?;

    let app = http::router(http::AppState::new(handle, http_store));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    tracing::info!(addr = %config.bind_addr, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
