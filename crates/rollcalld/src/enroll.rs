//! Enrollment capture loop.

use crate::engine::{Engine, EngineError, EnrollReport};
use rollcall_core::{Detector, EnrollmentSession, Extractor, FrameVerdict};
use rollcall_hw::{FrameSource, TemperatureSensor};

impl<C, D, E, S> Engine<C, D, E, S>
where
    C: FrameSource,
    D: Detector,
    E: Extractor,
    S: TemperatureSensor,
{
    /// Capture up to `samples` centered faces and replace the identity's
    /// embedding set with them.
    ///
    /// The loop stops at the target, when the frame budget is spent, or on a
    /// camera failure. Whatever was captured is stored; nothing captured is an
    /// error. A detector failure aborts without storing anything. The camera
    /// is released on every path and the gallery is reloaded after a
    /// successful write.
    pub fn enroll(&mut self, identity_id: i64, samples: Option<usize>) -> Result<EnrollReport, EngineError> {
        if self.store.get_identity(identity_id)?.is_none() {
            return Err(EngineError::IdentityNotFound(identity_id));
        }

        let target = samples.unwrap_or(self.settings.enroll_samples);
        let mut session = EnrollmentSession::new(target, self.settings.enroll_jitters);
        let mut frames = 0usize;
        let mut camera_error = None;
        let mut detect_error = None;

        tracing::info!(identity = identity_id, target = session.target(), "enrollment started");

        while !session.is_complete() && frames < self.settings.enroll_max_frames {
            let frame = match self.camera.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "camera read failed; ending enrollment");
                    camera_error = Some(e);
                    break;
                }
            };
            frames += 1;

            let gray = frame.to_grayscale();
            let verdict = match session.process(
                &mut self.enroll_detector,
                self.recognition.extractor_mut(),
                &gray,
                frame.width,
                frame.height,
            ) {
                Ok(verdict) => verdict,
                Err(e) => {
                    detect_error = Some(e);
                    break;
                }
            };
            match verdict {
                FrameVerdict::Captured { .. } | FrameVerdict::Complete => {}
                FrameVerdict::NoFace => tracing::trace!("enroll: no face"),
                FrameVerdict::MultipleFaces(n) => tracing::debug!(faces = n, "enroll: multiple faces"),
                FrameVerdict::OffCenter(face) => {
                    tracing::debug!(x = face.x, y = face.y, "enroll: face not centered")
                }
                FrameVerdict::NoEmbedding(_) => tracing::debug!("enroll: centered face could not be embedded"),
            }
        }
        self.camera.release();

        if let Some(e) = detect_error {
            tracing::warn!(
                error = %e,
                identity = identity_id,
                discarded = session.captured(),
                "enrollment aborted; captured samples discarded"
            );
            return Err(e.into());
        }

        if session.captured() == 0 {
            return Err(match camera_error {
                Some(e) => e.into(),
                None => EngineError::NoSamples { frames },
            });
        }

        let complete = session.is_complete();
        let target = session.target();
        let captured = session.into_samples();
        self.store.save_embeddings(identity_id, &captured)?;

        if let Err(e) = self.gallery.reload(&self.store) {
            tracing::warn!(error = %e, "gallery reload after enrollment failed");
        }

        tracing::info!(
            identity = identity_id,
            samples = captured.len(),
            frames,
            complete,
            "enrollment finished"
        );

        Ok(EnrollReport {
            identity_id,
            samples: captured.len(),
            target,
            frames,
            complete,
        })
    }
}
