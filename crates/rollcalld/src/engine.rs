use rollcall_core::{AttendanceRecorder, Detector, Extractor, FaceGallery, RecognitionEngine};
use rollcall_hw::{FrameSource, TemperatureSensor};
use rollcall_store::Store;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] rollcall_hw::CameraError),
    #[error("frame error: {0}")]
    Frame(#[from] rollcall_hw::FrameError),
    #[error("recognition error: {0}")]
    Recognition(#[from] rollcall_core::RecognitionError),
    #[error("sensor error: {0}")]
    Sensor(#[from] rollcall_hw::SensorError),
    #[error("store error: {0}")]
    Store(#[from] rollcall_store::StoreError),
    #[error("identity {0} not found")]
    IdentityNotFound(i64),
    #[error("no usable face in {frames} frames")]
    NoSamples { frames: usize },
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Outcome of an enrollment request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollReport {
    pub identity_id: i64,
    pub samples: usize,
    pub target: usize,
    pub frames: usize,
    /// False when the frame budget ran out before the target was met.
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GalleryStats {
    pub identities: usize,
    pub embeddings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub gallery: GalleryStats,
    pub tolerance: f32,
}

/// Knobs that are fixed for the life of the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub jpeg_quality: u8,
    pub enroll_samples: usize,
    pub enroll_jitters: usize,
    pub enroll_max_frames: usize,
}

/// Everything the engine thread owns.
pub struct Engine<C, D, E, S> {
    pub(crate) camera: C,
    pub(crate) recognition: RecognitionEngine<D, E>,
    pub(crate) enroll_detector: D,
    pub(crate) sensor: S,
    pub(crate) store: Store,
    pub(crate) gallery: FaceGallery,
    pub(crate) recorder: AttendanceRecorder,
    pub(crate) settings: EngineSettings,
}

impl<C, D, E, S> Engine<C, D, E, S>
where
    C: FrameSource,
    D: Detector,
    E: Extractor,
    S: TemperatureSensor,
{
    /// Assemble an engine and load the gallery from `store`.
    pub fn new(
        camera: C,
        recognition: RecognitionEngine<D, E>,
        enroll_detector: D,
        sensor: S,
        store: Store,
        recorder: AttendanceRecorder,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        let gallery = FaceGallery::load(&store)?;
        Ok(Self {
            camera,
            recognition,
            enroll_detector,
            sensor,
            store,
            gallery,
            recorder,
            settings,
        })
    }

    pub fn reload_gallery(&mut self) -> Result<GalleryStats, EngineError> {
        self.gallery.reload(&self.store)?;
        Ok(self.gallery_stats())
    }

    pub fn read_temperature(&mut self) -> Result<f32, EngineError> {
        Ok(self.sensor.read_temperature()?)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            gallery: self.gallery_stats(),
            tolerance: self.recognition.tolerance(),
        }
    }

    fn gallery_stats(&self) -> GalleryStats {
        GalleryStats {
            identities: self.gallery.identity_count(),
            embeddings: self.gallery.len(),
        }
    }
}

/// Messages sent from HTTP handlers to the engine thread.
pub(crate) enum EngineRequest {
    NextFrame {
        reply: oneshot::Sender<Result<Vec<u8>, EngineError>>,
    },
    ReadTemperature {
        reply: oneshot::Sender<Result<f32, EngineError>>,
    },
    Enroll {
        identity_id: i64,
        samples: Option<usize>,
        reply: oneshot::Sender<Result<EnrollReport, EngineError>>,
    },
    ReloadGallery {
        reply: oneshot::Sender<Result<GalleryStats, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    ReleaseCamera,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Handle with no engine behind it; requests land on the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<EngineRequest>) {
        let (tx, rx) = mpsc::channel(4);
        (Self { tx }, rx)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Capture, recognize, annotate and encode one frame as a multipart chunk.
    pub async fn next_frame(&self) -> Result<Vec<u8>, EngineError> {
        self.request(|reply| EngineRequest::NextFrame { reply }).await?
    }

    pub async fn read_temperature(&self) -> Result<f32, EngineError> {
        self.request(|reply| EngineRequest::ReadTemperature { reply }).await?
    }

    /// Collect face samples for `identity_id` and store them.
    pub async fn enroll(&self, identity_id: i64, samples: Option<usize>) -> Result<EnrollReport, EngineError> {
        self.request(|reply| EngineRequest::Enroll {
            identity_id,
            samples,
            reply,
        })
        .await?
    }

    pub async fn reload_gallery(&self) -> Result<GalleryStats, EngineError> {
        self.request(|reply| EngineRequest::ReloadGallery { reply }).await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    /// Ask the engine to close the camera once queued requests are served.
    /// Never blocks; dropped if the queue is full.
    pub fn release_camera(&self) {
        let _ = self.tx.try_send(EngineRequest::ReleaseCamera);
    }
}

/// Run `engine` on a dedicated OS thread and return a handle to it.
///
/// Requests are served one at a time, so the live stream and enrollment take
/// turns on the camera. The thread exits when every handle is dropped.
pub fn spawn_engine<C, D, E, S>(mut engine: Engine<C, D, E, S>) -> Result<EngineHandle, EngineError>
where
    C: FrameSource + 'static,
    D: Detector + Send + 'static,
    E: Extractor + Send + 'static,
    S: TemperatureSensor + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::NextFrame { reply } => {
                        let _ = reply.send(engine.next_frame());
                    }
                    EngineRequest::ReadTemperature { reply } => {
                        let _ = reply.send(engine.read_temperature());
                    }
                    EngineRequest::Enroll {
                        identity_id,
                        samples,
                        reply,
                    } => {
                        let _ = reply.send(engine.enroll(identity_id, samples));
                    }
                    EngineRequest::ReloadGallery { reply } => {
                        let _ = reply.send(engine.reload_gallery());
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(engine.status());
                    }
                    EngineRequest::ReleaseCamera => engine.release_camera(),
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
