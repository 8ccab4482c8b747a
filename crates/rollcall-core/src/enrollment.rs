//! Enrollment sample selection.
//!
//! A frame yields a sample only when it holds exactly one face whose four edges
//! all fall strictly inside a centered window of ±1/8 of the frame size. The
//! accepted face is cropped and re-embedded with extra jitter.

use crate::detector::Detector;
use crate::imageops;
use crate::recognition::RecognitionError;
use crate::recognizer::Extractor;
use crate::types::{BoundingBox, Embedding};

/// Default number of samples collected per enrollment.
pub const DEFAULT_TARGET_SAMPLES: usize = 5;

/// Default jitter count for enrollment embeddings.
pub const DEFAULT_ENROLL_JITTERS: usize = 3;

/// Centered acceptance window for enrollment faces.
///
/// Bounds are exclusive on both sides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenteringGate {
    x_min: f32,
    x_max: f32,
    y_min: f32,
    y_max: f32,
}

impl CenteringGate {
    pub fn for_frame(width: u32, height: u32) -> Self {
        let (cx, cy) = (width / 2, height / 2);
        let (mx, my) = (width / 8, height / 8);
        Self {
            x_min: cx as f32 - mx as f32,
            x_max: (cx + mx) as f32,
            y_min: cy as f32 - my as f32,
            y_max: (cy + my) as f32,
        }
    }

    pub fn accepts(&self, face: &BoundingBox) -> bool {
        let inside_x = |v: f32| self.x_min < v && v < self.x_max;
        let inside_y = |v: f32| self.y_min < v && v < self.y_max;
        inside_x(face.left()) && inside_x(face.right()) && inside_y(face.top()) && inside_y(face.bottom())
    }
}

/// What happened to one enrollment frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameVerdict {
    NoFace,
    MultipleFaces(usize),
    OffCenter(BoundingBox),
    /// The face was centered but the crop could not be embedded.
    NoEmbedding(BoundingBox),
    Captured { face: BoundingBox, captured: usize, target: usize },
    /// The target was already reached; the frame was ignored.
    Complete,
}

/// Sample buffer for one enrollment attempt.
#[derive(Debug)]
pub struct EnrollmentSession {
    target: usize,
    jitters: usize,
    samples: Vec<Embedding>,
}

impl EnrollmentSession {
    pub fn new(target: usize, jitters: usize) -> Self {
        let target = target.max(1);
        Self {
            target,
            jitters,
            samples: Vec::with_capacity(target),
        }
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn captured(&self) -> usize {
        self.samples.len()
    }

    pub fn is_complete(&self) -> bool {
        self.samples.len() >= self.target
    }

    pub fn samples(&self) -> &[Embedding] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<Embedding> {
        self.samples
    }

    /// Evaluate one grayscale frame and keep its sample if it qualifies.
    pub fn process<D: Detector, E: Extractor>(
        &mut self,
        detector: &mut D,
        extractor: &mut E,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<FrameVerdict, RecognitionError> {
        if self.is_complete() {
            return Ok(FrameVerdict::Complete);
        }

        let faces = detector.detect(gray, width, height)?;
        let face = match faces.as_slice() {
            [] => return Ok(FrameVerdict::NoFace),
            [face] => face.clone(),
            many => return Ok(FrameVerdict::MultipleFaces(many.len())),
        };

        if !CenteringGate::for_frame(width, height).accepts(&face) {
            return Ok(FrameVerdict::OffCenter(face));
        }

        let (x0, y0) = (face.left().round() as i64, face.top().round() as i64);
        let (x1, y1) = (face.right().round() as i64, face.bottom().round() as i64);
        let (crop, cw, ch) = imageops::crop(gray, width, height, x0, y0, x1, y1);
        let local = face.relative_to(x0 as f32, y0 as f32);

        let embedding = match extractor.extract(&crop, cw, ch, &local, self.jitters) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::debug!(error = %e, "could not embed centered face");
                return Ok(FrameVerdict::NoEmbedding(face));
            }
        };

        self.samples.push(embedding);
        tracing::info!(captured = self.samples.len(), target = self.target, "enrollment sample captured");
        Ok(FrameVerdict::Captured {
            face,
            captured: self.samples.len(),
            target: self.target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::tests::{face_at, FixedExtractor, ScriptedDetector};

    // 640x480 → window x ∈ (240, 400), y ∈ (180, 300)
    const W: u32 = 640;
    const H: u32 = 480;

    #[test]
    fn test_gate_bounds() {
        let gate = CenteringGate::for_frame(W, H);
        assert_eq!(
            gate,
            CenteringGate {
                x_min: 240.0,
                x_max: 400.0,
                y_min: 180.0,
                y_max: 300.0
            }
        );
    }

    #[test]
    fn test_gate_accepts_strictly_inside() {
        let gate = CenteringGate::for_frame(W, H);
        assert!(gate.accepts(&face_at(241.0, 181.0, 158.0, 118.0, 0.9)));
        assert!(gate.accepts(&face_at(280.0, 200.0, 80.0, 80.0, 0.9)));
    }

    #[test]
    fn test_gate_rejects_touching_any_edge() {
        let gate = CenteringGate::for_frame(W, H);
        // left == x_min
        assert!(!gate.accepts(&face_at(240.0, 200.0, 80.0, 80.0, 0.9)));
        // right == x_max
        assert!(!gate.accepts(&face_at(300.0, 200.0, 100.0, 80.0, 0.9)));
        // top == y_min
        assert!(!gate.accepts(&face_at(280.0, 180.0, 80.0, 80.0, 0.9)));
        // bottom == y_max
        assert!(!gate.accepts(&face_at(280.0, 200.0, 80.0, 100.0, 0.9)));
        // far outside
        assert!(!gate.accepts(&face_at(10.0, 10.0, 50.0, 50.0, 0.9)));
    }

    fn centered() -> BoundingBox {
        face_at(280.0, 200.0, 80.0, 80.0, 0.9)
    }

    #[test]
    fn test_process_verdicts() {
        let mut detector = ScriptedDetector::new(vec![
            vec![],
            vec![centered(), face_at(0.0, 0.0, 10.0, 10.0, 0.5)],
            vec![face_at(0.0, 0.0, 100.0, 100.0, 0.9)],
            vec![centered()],
        ]);
        let mut extractor = FixedExtractor::new(vec![0.1, 0.2]);
        let mut session = EnrollmentSession::new(5, 3);
        let frame = vec![0u8; (W * H) as usize];

        let mut run = |session: &mut EnrollmentSession| {
            session
                .process(&mut detector, &mut extractor, &frame, W, H)
                .unwrap()
        };

        assert_eq!(run(&mut session), FrameVerdict::NoFace);
        assert_eq!(run(&mut session), FrameVerdict::MultipleFaces(2));
        assert!(matches!(run(&mut session), FrameVerdict::OffCenter(_)));
        assert!(matches!(
            run(&mut session),
            FrameVerdict::Captured {
                captured: 1,
                target: 5,
                ..
            }
        ));
        assert_eq!(session.captured(), 1);
    }

    #[test]
    fn test_sample_uses_crop_and_jitters() {
        struct CropCheck(Vec<(u32, u32, f32, f32, usize)>);
        impl Extractor for CropCheck {
            fn extract(
                &mut self,
                _gray: &[u8],
                width: u32,
                height: u32,
                face: &BoundingBox,
                jitters: usize,
            ) -> Result<Embedding, crate::recognizer::RecognizerError> {
                self.0.push((width, height, face.x, face.y, jitters));
                Ok(Embedding::new(vec![1.0]))
            }
        }

        let mut detector = ScriptedDetector::new(vec![vec![centered()]]);
        let mut extractor = CropCheck(Vec::new());
        let mut session = EnrollmentSession::new(1, 3);
        session
            .process(&mut detector, &mut extractor, &vec![0u8; (W * H) as usize], W, H)
            .unwrap();

        assert_eq!(extractor.0, vec![(80, 80, 0.0, 0.0, 3)]);
    }

    #[test]
    fn test_stops_exactly_at_target() {
        let mut detector = ScriptedDetector::new(vec![vec![centered()]; 10]);
        let mut extractor = FixedExtractor::new(vec![0.5]);
        let mut session = EnrollmentSession::new(3, 3);
        let frame = vec![0u8; (W * H) as usize];

        let mut verdicts = Vec::new();
        for _ in 0..6 {
            verdicts.push(session.process(&mut detector, &mut extractor, &frame, W, H).unwrap());
        }

        assert_eq!(session.captured(), 3);
        assert!(session.is_complete());
        assert_eq!(&verdicts[3..], &[FrameVerdict::Complete, FrameVerdict::Complete, FrameVerdict::Complete]);
        // Frames after completion never reach the detector.
        assert_eq!(detector.seen_sizes.len(), 3);
        assert_eq!(extractor.jitters, vec![3, 3, 3]);
        assert_eq!(session.into_samples().len(), 3);
    }

    #[test]
    fn test_face_without_landmarks_yields_no_embedding() {
        let mut face = centered();
        face.landmarks = None;
        let mut detector = ScriptedDetector::new(vec![vec![face]]);
        let mut extractor = FixedExtractor::new(vec![0.5]);
        let mut session = EnrollmentSession::new(2, 3);

        let verdict = session
            .process(&mut detector, &mut extractor, &vec![0u8; (W * H) as usize], W, H)
            .unwrap();
        assert!(matches!(verdict, FrameVerdict::NoEmbedding(_)));
        assert_eq!(session.captured(), 0);
    }
}
