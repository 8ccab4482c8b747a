//! Per-frame live cycle: capture, identify, read the thermometer, record
//! attendance, annotate and encode one MJPEG part.

use crate::engine::{Engine, EngineError};
use chrono::Utc;
use rollcall_core::{Detector, Extractor, Identification, Recognition, RecordOutcome};
use rollcall_hw::overlay::{self, Color, GLYPH_SIZE};
use rollcall_hw::{Frame, FrameSource, TemperatureSensor};

/// `Content-Type` of the live stream.
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const TEXT_SCALE: u32 = 2;
const LABEL_HEIGHT: i64 = 35;

impl<C, D, E, S> Engine<C, D, E, S>
where
    C: FrameSource,
    D: Detector,
    E: Extractor,
    S: TemperatureSensor,
{
    /// Produce the next stream part. A camera failure ends the stream.
    pub fn next_frame(&mut self) -> Result<Vec<u8>, EngineError> {
        let mut frame = self.camera.read_frame()?;
        let gray = frame.to_grayscale();
        let recognition = self
            .recognition
            .recognize(&gray, frame.width, frame.height, &self.gallery)?;

        // The thermometer is only consulted for a recognized person; nothing
        // else uses the reading.
        let temperature = match recognition.identification {
            Identification::Known { identity_id, .. } => self.read_and_record(identity_id),
            _ => None,
        };

        annotate(&mut frame, &recognition, temperature);
        let jpeg = frame.encode_jpeg(self.settings.jpeg_quality)?;
        Ok(multipart_chunk(&jpeg))
    }

    /// Give the camera back after a stream ends.
    pub fn release_camera(&mut self) {
        self.camera.release();
    }

    fn read_and_record(&mut self, identity_id: i64) -> Option<f32> {
        let temperature = match self.sensor.read_temperature() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "no temperature reading");
                return None;
            }
        };

        match self.recorder.record(&self.store, identity_id, temperature, Utc::now()) {
            Ok(RecordOutcome::Recorded(status)) => {
                tracing::debug!(identity = identity_id, %status, temperature, "sighting recorded");
            }
            Ok(RecordOutcome::Debounced) => {}
            Err(e) => tracing::warn!(identity = identity_id, error = %e, "failed to record attendance"),
        }
        Some(temperature)
    }
}

/// Draw detection boxes, the recognized name and the status text.
pub fn annotate(frame: &mut Frame, recognition: &Recognition, temperature: Option<f32>) {
    for face in &recognition.faces {
        let (l, t, r, b) = corners(face);
        overlay::draw_rect(frame, l, t, r, b, 2, Color::RED);
    }

    match (&recognition.identification, recognition.faces.first()) {
        (Identification::Known { name, .. }, Some(face)) => {
            let (l, t, r, b) = corners(face);
            overlay::draw_rect(frame, l, t, r, b, 2, Color::GREEN);
            overlay::fill_rect(frame, l, b - LABEL_HEIGHT, r + 1, b + 1, Color::GREEN);
            draw_line(frame, name, l + 6, b - 6, Color::WHITE);

            if let Some(t) = temperature {
                draw_line(frame, &format!("Temp: {t:.1}°C"), 10, 30, Color::RED);
            }
        }
        _ if recognition.gallery_empty => draw_line(frame, "No known faces loaded!", 10, 60, Color::RED),
        _ => draw_line(frame, "No face detected", 10, 30, Color::RED),
    }
}

/// Draw text whose baseline sits at `baseline`.
fn draw_line(frame: &mut Frame, text: &str, x: i64, baseline: i64, color: Color) {
    let top = baseline - (GLYPH_SIZE * TEXT_SCALE) as i64;
    overlay::draw_text(frame, text, x, top, TEXT_SCALE, color);
}

fn corners(face: &rollcall_core::BoundingBox) -> (i64, i64, i64, i64) {
    (
        face.left().round() as i64,
        face.top().round() as i64,
        face.right().round() as i64,
        face.bottom().round() as i64,
    )
}

/// Wrap a JPEG as one `multipart/x-mixed-replace` part.
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    const HEAD: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    let mut chunk = Vec::with_capacity(HEAD.len() + jpeg.len() + 2);
    chunk.extend_from_slice(HEAD);
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}
