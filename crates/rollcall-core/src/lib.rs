//! rollcall-core: face recognition and attendance rules.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both running
//! via ONNX Runtime on the CPU. Persistence and hardware are reached through
//! the [`IdentityStore`], [`AttendanceLog`], [`Detector`] and [`Extractor`]
//! traits so the decision logic can run without either.

pub mod alignment;
pub mod attendance;
pub mod detector;
pub mod enrollment;
pub mod gallery;
pub mod imageops;
pub mod recognition;
pub mod recognizer;
pub mod types;

pub use attendance::{AttendanceLog, AttendanceRecord, AttendanceRecorder, AttendanceStatus, RecordOutcome};
pub use detector::{Detector, FaceDetector};
pub use enrollment::{CenteringGate, EnrollmentSession, FrameVerdict};
pub use gallery::{FaceGallery, IdentityStore};
pub use recognition::{Identification, Recognition, RecognitionEngine, RecognitionError};
pub use recognizer::{Extractor, FaceRecognizer};
pub use types::{BoundingBox, Embedding, EuclideanMatcher, GalleryEntry, Identity, MatchResult, Matcher};

use std::path::PathBuf;

/// System-wide model directory used when `ROLLCALL_MODEL_DIR` is unset.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/rollcall/models")
}
