//! Hardware and model fakes for engine, pipeline and router tests.

use crate::engine::{Engine, EngineSettings};
use rollcall_core::detector::DetectorError;
use rollcall_core::recognizer::RecognizerError;
use rollcall_core::{AttendanceRecorder, BoundingBox, Detector, Embedding, Extractor, RecognitionEngine};
use rollcall_hw::{CameraError, Frame, FrameSource, SensorError, TemperatureSensor};
use rollcall_store::Store;
use std::collections::VecDeque;
use std::path::Path;

pub const W: u32 = 160;
pub const H: u32 = 120;

/// Solid gray frames, optionally failing after a fixed number of reads.
pub struct FakeCamera {
    pub remaining: Option<usize>,
    pub reads: usize,
    pub releases: usize,
}

impl FakeCamera {
    pub fn endless() -> Self {
        Self {
            remaining: None,
            reads: 0,
            releases: 0,
        }
    }

    pub fn failing_after(frames: usize) -> Self {
        Self {
            remaining: Some(frames),
            ..Self::endless()
        }
    }
}

impl FrameSource for FakeCamera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if let Some(left) = self.remaining.as_mut() {
            if *left == 0 {
                return Err(CameraError::CaptureFailed("unplugged".into()));
            }
            *left -= 1;
        }
        self.reads += 1;
        Ok(Frame::filled(W, H, [90, 90, 90]))
    }

    fn release(&mut self) {
        self.releases += 1;
    }
}

/// Replays one detection list per frame, then reports no faces or fails.
pub struct ScriptedDetector {
    pub script: VecDeque<Vec<BoundingBox>>,
    pub fail_when_exhausted: bool,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<BoundingBox>>) -> Self {
        Self {
            script: script.into(),
            fail_when_exhausted: false,
        }
    }
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, _gray: &[u8], _width: u32, _height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
        match self.script.pop_front() {
            Some(faces) => Ok(faces),
            None if self.fail_when_exhausted => Err(DetectorError::InferenceFailed("session aborted".into())),
            None => Ok(Vec::new()),
        }
    }
}

pub struct FixedExtractor(pub Vec<f32>);

impl Extractor for FixedExtractor {
    fn extract(
        &mut self,
        _gray: &[u8],
        _width: u32,
        _height: u32,
        _face: &BoundingBox,
        _jitters: usize,
    ) -> Result<Embedding, RecognizerError> {
        Ok(Embedding::new(self.0.clone()))
    }
}

pub struct FakeSensor {
    pub reading: Option<f32>,
    pub reads: usize,
}

impl FakeSensor {
    pub fn reading(value: f32) -> Self {
        Self {
            reading: Some(value),
            reads: 0,
        }
    }

    pub fn failing() -> Self {
        Self { reading: None, reads: 0 }
    }
}

impl TemperatureSensor for FakeSensor {
    fn read_temperature(&mut self) -> Result<f32, SensorError> {
        self.reads += 1;
        self.reading.ok_or(SensorError::Timeout(std::time::Duration::from_secs(2)))
    }
}

pub type TestEngine = Engine<FakeCamera, ScriptedDetector, FixedExtractor, FakeSensor>;

pub fn face_at(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
    BoundingBox {
        x,
        y,
        width: w,
        height: h,
        confidence: 0.9,
        landmarks: Some([(x + w / 2.0, y + h / 2.0); 5]),
    }
}

/// Inside the enrollment window of a W×H frame: x ∈ (60, 100), y ∈ (45, 75).
pub fn centered_face() -> BoundingBox {
    face_at(65.0, 50.0, 30.0, 20.0)
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        jpeg_quality: 70,
        enroll_samples: 5,
        enroll_jitters: 3,
        enroll_max_frames: 10,
    }
}

/// Engine over the database at `db`. Both detectors replay `detections`; the
/// extractor always yields `[1, 0]`.
pub fn engine_with(db: &Path, detections: Vec<Vec<BoundingBox>>, sensor: FakeSensor) -> TestEngine {
    engine_from_parts(
        Store::open(db).unwrap(),
        FakeCamera::endless(),
        detections.clone(),
        detections,
        sensor,
    )
}

pub fn engine_from_parts(
    store: Store,
    camera: FakeCamera,
    live: Vec<Vec<BoundingBox>>,
    enroll: Vec<Vec<BoundingBox>>,
    sensor: FakeSensor,
) -> TestEngine {
    let recognition = RecognitionEngine::new(ScriptedDetector::new(live), FixedExtractor(vec![1.0, 0.0]));
    Engine::new(
        camera,
        recognition,
        ScriptedDetector::new(enroll),
        sensor,
        store,
        AttendanceRecorder::default(),
        settings(),
    )
    .unwrap()
}
