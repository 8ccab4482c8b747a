use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn left(&self) -> f32 {
        self.x
    }

    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Scale the box and its landmarks by `factor` in both dimensions.
    ///
    /// Used to map detections from a downscaled frame back to the full frame.
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * factor, ly * factor))),
        }
    }

    /// Shift the box and its landmarks so that `(origin_x, origin_y)` becomes (0, 0).
    pub fn relative_to(&self, origin_x: f32, origin_y: f32) -> BoundingBox {
        BoundingBox {
            x: self.x - origin_x,
            y: self.y - origin_y,
            width: self.width,
            height: self.height,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx - origin_x, ly - origin_y))),
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance between two embeddings, `None` if their lengths differ.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let sum = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>();
        Some(sum.sqrt())
    }

    /// Serialize an identity's embedding set into the blob stored alongside it.
    pub fn encode_set(set: &[Embedding]) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(set)
    }

    /// Inverse of [`encode_set`](Self::encode_set).
    pub fn decode_set(blob: &[u8]) -> Result<Vec<Embedding>, serde_json::Error> {
        serde_json::from_slice(blob)
    }
}

/// A known person as persisted by the identity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub name: String,
    /// External reference such as an enrollment number.
    pub reference: Option<String>,
    /// Serialized embedding set, `None` until the person has been enrolled.
    #[serde(skip)]
    pub embeddings: Option<Vec<u8>>,
}

/// One gallery embedding together with the identity it belongs to.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub embedding: Embedding,
    pub identity_id: i64,
    pub name: String,
    pub reference: Option<String>,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the nearest gallery entry; `None` when the gallery is empty.
    pub distance: Option<f32>,
    pub identity_id: Option<i64>,
    pub name: Option<String>,
    pub reference: Option<String>,
}

impl MatchResult {
    pub fn no_match(distance: Option<f32>) -> Self {
        Self {
            matched: false,
            distance,
            identity_id: None,
            name: None,
            reference: None,
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], tolerance: f32) -> MatchResult;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// The arg-min entry is accepted only when its distance is within `tolerance`.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], tolerance: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;
        let mut mismatched = 0usize;

        for (i, entry) in gallery.iter().enumerate() {
            let Some(dist) = probe.euclidean_distance(&entry.embedding) else {
                mismatched += 1;
                continue;
            };
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }
        if mismatched > 0 {
            tracing::debug!(
                skipped = mismatched,
                probe_dim = probe.values.len(),
                "gallery entries with a different embedding size ignored"
            );
        }

        match best_idx {
            Some(idx) if best_dist <= tolerance => {
                let entry = &gallery[idx];
                MatchResult {
                    matched: true,
                    distance: Some(best_dist),
                    identity_id: Some(entry.identity_id),
                    name: Some(entry.name.clone()),
                    reference: entry.reference.clone(),
                }
            }
            Some(_) => MatchResult::no_match(Some(best_dist)),
            None => MatchResult::no_match(None),
        }
    }
}
