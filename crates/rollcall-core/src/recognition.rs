//! Per-frame identity decision.
//!
//! The frame is downscaled before detection. Every detected face is reported
//! (in full-frame coordinates) so callers can box them all, but only the first,
//! highest-confidence face is embedded and matched.

use crate::detector::{Detector, DetectorError};
use crate::gallery::FaceGallery;
use crate::imageops;
use crate::recognizer::{Extractor, RecognizerError};
use crate::types::{BoundingBox, EuclideanMatcher, MatchResult, Matcher};
use thiserror::Error;

/// Default maximum embedding distance for an accepted match.
pub const DEFAULT_TOLERANCE: f32 = 0.5;

/// Default per-dimension downscale applied before detection.
pub const DEFAULT_DOWNSCALE: f32 = 0.25;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    /// No face in the frame.
    NoFace,
    /// A face was evaluated but nothing in the gallery is within tolerance.
    /// `distance` is to the nearest entry, `None` for an empty gallery.
    Unknown { distance: Option<f32> },
    Known {
        identity_id: i64,
        name: String,
        reference: Option<String>,
        distance: f32,
    },
}

impl Identification {
    pub fn is_known(&self) -> bool {
        matches!(self, Identification::Known { .. })
    }

    /// Display name, `"Unknown"` for anything unmatched.
    pub fn name(&self) -> &str {
        match self {
            Identification::Known { name, .. } => name,
            _ => "Unknown",
        }
    }
}

/// Outcome of [`RecognitionEngine::recognize`].
#[derive(Debug, Clone)]
pub struct Recognition {
    /// All detected faces in full-frame coordinates, evaluated face first.
    pub faces: Vec<BoundingBox>,
    pub identification: Identification,
    /// The gallery had no embeddings when this frame was evaluated.
    pub gallery_empty: bool,
}

/// Detection + embedding + gallery lookup for live frames.
pub struct RecognitionEngine<D, E> {
    detector: D,
    extractor: E,
    tolerance: f32,
    downscale: f32,
}

impl<D: Detector, E: Extractor> RecognitionEngine<D, E> {
    pub fn new(detector: D, extractor: E) -> Self {
        Self {
            detector,
            extractor,
            tolerance: DEFAULT_TOLERANCE,
            downscale: DEFAULT_DOWNSCALE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the detection downscale. Values outside (0, 1] are clamped.
    pub fn with_downscale(mut self, factor: f32) -> Self {
        self.downscale = if factor.is_finite() {
            factor.clamp(0.01, 1.0)
        } else {
            DEFAULT_DOWNSCALE
        };
        self
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// The embedding extractor, shared with enrollment.
    pub fn extractor_mut(&mut self) -> &mut E {
        &mut self.extractor
    }

    /// Identify the person in a full-resolution grayscale frame.
    pub fn recognize(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
        gallery: &FaceGallery,
    ) -> Result<Recognition, RecognitionError> {
        let gallery_empty = gallery.is_empty();
        let (small, sw, sh) = imageops::downscale(gray, width, height, self.downscale);
        let detected = self.detector.detect(&small, sw, sh)?;

        let Some(first) = detected.first() else {
            return Ok(Recognition {
                faces: Vec::new(),
                identification: Identification::NoFace,
                gallery_empty,
            });
        };

        // Embed from the same downscaled buffer the box was found in.
        let probe = self.extractor.extract(&small, sw, sh, first, 1)?;
        let result = EuclideanMatcher.compare(&probe, gallery.entries(), self.tolerance);

        let identification = match result {
            MatchResult {
                matched: true,
                distance: Some(distance),
                identity_id: Some(identity_id),
                name: Some(name),
                reference,
            } => Identification::Known {
                identity_id,
                name,
                reference,
                distance,
            },
            other => Identification::Unknown {
                distance: other.distance,
            },
        };

        if detected.len() > 1 {
            tracing::debug!(faces = detected.len(), "multiple faces; evaluating the most confident");
        }

        let upscale = 1.0 / self.downscale;
        Ok(Recognition {
            faces: detected.iter().map(|f| f.scaled(upscale)).collect(),
            identification,
            gallery_empty,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gallery::tests::{enrolled, MemoryIdentities};
    use crate::types::Embedding;
    use std::collections::VecDeque;

    /// Detector returning scripted results, one per call.
    pub(crate) struct ScriptedDetector {
        pub frames: VecDeque<Vec<BoundingBox>>,
        pub seen_sizes: Vec<(u32, u32)>,
    }

    impl ScriptedDetector {
        pub fn new(frames: Vec<Vec<BoundingBox>>) -> Self {
            Self {
                frames: frames.into(),
                seen_sizes: Vec::new(),
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&mut self, _gray: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
            self.seen_sizes.push((width, height));
            Ok(self.frames.pop_front().unwrap_or_default())
        }
    }

    /// Extractor returning a fixed embedding and remembering the jitter counts it saw.
    pub(crate) struct FixedExtractor {
        pub embedding: Vec<f32>,
        pub jitters: Vec<usize>,
    }

    impl FixedExtractor {
        pub fn new(embedding: Vec<f32>) -> Self {
            Self {
                embedding,
                jitters: Vec::new(),
            }
        }
    }

    impl Extractor for FixedExtractor {
        fn extract(
            &mut self,
            _gray: &[u8],
            _width: u32,
            _height: u32,
            face: &BoundingBox,
            jitters: usize,
        ) -> Result<Embedding, RecognizerError> {
            face.landmarks.ok_or(RecognizerError::NoLandmarks)?;
            self.jitters.push(jitters);
            Ok(Embedding::new(self.embedding.clone()))
        }
    }

    pub(crate) fn face_at(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence,
            landmarks: Some([(x + w / 2.0, y + h / 2.0); 5]),
        }
    }

    fn gallery() -> FaceGallery {
        let store = MemoryIdentities::with(vec![
            enrolled(1, "ana", &[vec![1.0, 0.0, 0.0]]),
            enrolled(2, "ben", &[vec![0.0, 1.0, 0.0], vec![0.0, 0.9, 0.1]]),
        ]);
        FaceGallery::load(&store).unwrap()
    }

    fn frame() -> Vec<u8> {
        vec![100u8; 640 * 480]
    }

    #[test]
    fn test_no_face() {
        let mut engine = RecognitionEngine::new(ScriptedDetector::new(vec![vec![]]), FixedExtractor::new(vec![1.0, 0.0, 0.0]));
        let rec = engine.recognize(&frame(), 640, 480, &gallery()).unwrap();
        assert_eq!(rec.identification, Identification::NoFace);
        assert!(rec.faces.is_empty());
        assert!(!rec.gallery_empty);
    }

    #[test]
    fn test_exact_embedding_is_identified() {
        let detector = ScriptedDetector::new(vec![vec![face_at(40.0, 30.0, 20.0, 25.0, 0.9)]]);
        let mut engine = RecognitionEngine::new(detector, FixedExtractor::new(vec![0.0, 1.0, 0.0]));

        let rec = engine.recognize(&frame(), 640, 480, &gallery()).unwrap();
        match rec.identification {
            Identification::Known {
                identity_id,
                ref name,
                ref reference,
                distance,
            } => {
                assert_eq!(identity_id, 2);
                assert_eq!(name, "ben");
                assert_eq!(reference.as_deref(), Some("LRN-2"));
                assert_eq!(distance, 0.0);
            }
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn test_far_embedding_is_unknown() {
        let detector = ScriptedDetector::new(vec![vec![face_at(40.0, 30.0, 20.0, 25.0, 0.9)]]);
        let mut engine = RecognitionEngine::new(detector, FixedExtractor::new(vec![-1.0, -1.0, 1.0]));

        let rec = engine.recognize(&frame(), 640, 480, &gallery()).unwrap();
        match rec.identification {
            Identification::Unknown { distance: Some(d) } => assert!(d > DEFAULT_TOLERANCE),
            other => panic!("expected unknown, got {other:?}"),
        }
        assert_eq!(rec.identification.name(), "Unknown");
    }

    #[test]
    fn test_empty_gallery_is_unknown_and_flagged() {
        let detector = ScriptedDetector::new(vec![vec![face_at(40.0, 30.0, 20.0, 25.0, 0.9)]]);
        let mut engine = RecognitionEngine::new(detector, FixedExtractor::new(vec![1.0, 0.0, 0.0]));

        let rec = engine.recognize(&frame(), 640, 480, &FaceGallery::new()).unwrap();
        assert_eq!(rec.identification, Identification::Unknown { distance: None });
        assert!(rec.gallery_empty);
    }

    #[test]
    fn test_detects_on_downscaled_frame_and_scales_boxes_back() {
        let detector = ScriptedDetector::new(vec![vec![
            face_at(40.0, 30.0, 20.0, 25.0, 0.9),
            face_at(100.0, 60.0, 10.0, 10.0, 0.6),
        ]]);
        let mut engine = RecognitionEngine::new(detector, FixedExtractor::new(vec![1.0, 0.0, 0.0]));

        let rec = engine.recognize(&frame(), 640, 480, &gallery()).unwrap();
        assert_eq!(engine.detector.seen_sizes, vec![(160, 120)]);
        assert_eq!(rec.faces.len(), 2);
        assert_eq!((rec.faces[0].x, rec.faces[0].y), (160.0, 120.0));
        assert_eq!((rec.faces[0].width, rec.faces[0].height), (80.0, 100.0));
        assert_eq!((rec.faces[1].x, rec.faces[1].y), (400.0, 240.0));
        // Only the first face was embedded, without jitter.
        assert_eq!(engine.extractor.jitters, vec![1]);
        assert!(rec.identification.is_known());
    }

    #[test]
    fn test_tolerance_is_configurable() {
        let detector = ScriptedDetector::new(vec![vec![face_at(0.0, 0.0, 10.0, 10.0, 0.9)]]);
        let mut engine = RecognitionEngine::new(detector, FixedExtractor::new(vec![0.8, 0.2, 0.0])).with_tolerance(0.1);
        let rec = engine.recognize(&frame(), 640, 480, &gallery()).unwrap();
        assert!(!rec.identification.is_known());
        assert_eq!(engine.tolerance(), 0.1);
    }
}
