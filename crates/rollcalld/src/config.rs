use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture size; the driver may negotiate another.
    pub camera_width: u32,
    pub camera_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Detector used for the live stream.
    pub detector_model: String,
    /// Detector used during enrollment; may be heavier than the live one.
    pub enroll_detector_model: String,
    pub recognizer_model: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum embedding distance for a positive match.
    pub tolerance: f32,
    /// Per-dimension scale applied before live detection.
    pub downscale: f32,
    pub serial_port: String,
    pub serial_baud: u32,
    /// Wait after opening the serial port before requesting a reading.
    pub sensor_settle: Duration,
    pub sensor_timeout: Duration,
    /// Readings at or above this are recorded as an anomaly.
    pub fever_threshold: f32,
    pub debounce_secs: i64,
    /// Samples collected per enrollment unless the request says otherwise.
    pub enroll_samples: usize,
    pub enroll_jitters: usize,
    /// Frames examined before an enrollment gives up.
    pub enroll_max_frames: usize,
    pub jpeg_quality: u8,
    pub bind_addr: String,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| rollcall_core::default_model_dir());

        Self {
            camera_device: env_string("ROLLCALL_CAMERA_DEVICE", "/dev/video0"),
            camera_width: env_u32("ROLLCALL_CAMERA_WIDTH", 640),
            camera_height: env_u32("ROLLCALL_CAMERA_HEIGHT", 480),
            model_dir,
            detector_model: env_string("ROLLCALL_DETECTOR_MODEL", "det_500m.onnx"),
            enroll_detector_model: env_string("ROLLCALL_ENROLL_DETECTOR_MODEL", "det_10g.onnx"),
            recognizer_model: env_string("ROLLCALL_RECOGNIZER_MODEL", "w600k_r50.onnx"),
            db_path: rollcall_store::default_db_path(),
            tolerance: env_f32("ROLLCALL_TOLERANCE", rollcall_core::recognition::DEFAULT_TOLERANCE),
            downscale: env_f32("ROLLCALL_DOWNSCALE", rollcall_core::recognition::DEFAULT_DOWNSCALE),
            serial_port: env_string("ROLLCALL_SERIAL_PORT", "/dev/ttyACM0"),
            serial_baud: env_u32("ROLLCALL_SERIAL_BAUD", 9600),
            sensor_settle: Duration::from_millis(env_u64("ROLLCALL_SENSOR_SETTLE_MS", 2000)),
            sensor_timeout: Duration::from_millis(env_u64("ROLLCALL_SENSOR_TIMEOUT_MS", 2000)),
            fever_threshold: env_f32(
                "ROLLCALL_FEVER_THRESHOLD",
                rollcall_core::attendance::DEFAULT_FEVER_THRESHOLD,
            ),
            debounce_secs: env_u64(
                "ROLLCALL_DEBOUNCE_SECS",
                rollcall_core::attendance::DEFAULT_DEBOUNCE_SECS as u64,
            ) as i64,
            enroll_samples: env_usize(
                "ROLLCALL_ENROLL_SAMPLES",
                rollcall_core::enrollment::DEFAULT_TARGET_SAMPLES,
            ),
            enroll_jitters: env_usize(
                "ROLLCALL_ENROLL_JITTERS",
                rollcall_core::enrollment::DEFAULT_ENROLL_JITTERS,
            ),
            enroll_max_frames: env_usize("ROLLCALL_ENROLL_MAX_FRAMES", 300),
            jpeg_quality: env_u32("ROLLCALL_JPEG_QUALITY", 80).clamp(1, 100) as u8,
            bind_addr: env_string("ROLLCALL_BIND", "127.0.0.1:8080"),
        }
    }

    pub fn detector_model_path(&self) -> String {
        self.model_path(&self.detector_model)
    }

    pub fn enroll_detector_model_path(&self) -> String {
        self.model_path(&self.enroll_detector_model)
    }

    pub fn recognizer_model_path(&self) -> String {
        self.model_path(&self.recognizer_model)
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
