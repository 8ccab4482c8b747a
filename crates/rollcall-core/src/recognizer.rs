//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional, L2-normalized embeddings from aligned face crops
//! using the w600k_r50 model. With more than one jitter the embedding is the
//! normalized mean over several perturbed alignments, which is slower but more
//! stable and is what enrollment uses.

use crate::alignment::{self, Jitter, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, not 128.0
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; alignment needs detector landmarks")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that turns a detected face into an embedding.
pub trait Extractor {
    /// Extract an embedding for `face` from a grayscale buffer.
    ///
    /// `jitters` ≤ 1 computes a single embedding.
    fn extract(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
        jitters: usize,
    ) -> Result<Embedding, RecognizerError>;
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2).map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Run the network on one aligned crop and return the raw output vector.
    fn infer(&mut self, aligned: &[u8]) -> Result<Vec<f32>, RecognizerError> {
        let input = preprocess(aligned);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }
        Ok(raw.to_vec())
    }
}

impl Extractor for FaceRecognizer {
    fn extract(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
        jitters: usize,
    ) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;

        let mut sum = vec![0.0f32; ARCFACE_EMBEDDING_DIM];
        for jitter in Jitter::series(jitters) {
            let aligned = alignment::align_face_jittered(gray, width, height, landmarks, jitter);
            let raw = self.infer(&aligned)?;
            for (acc, v) in sum.iter_mut().zip(l2_normalize(raw)) {
                *acc += v;
            }
        }

        Ok(Embedding {
            values: l2_normalize(sum),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

/// Scale a vector to unit length. A zero vector is returned unchanged.
fn l2_normalize(values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.into_iter().map(|x| x / norm).collect()
    } else {
        values
    }
}

/// Convert a 112x112 grayscale aligned crop into a NCHW float tensor.
fn preprocess(aligned: &[u8]) -> Array4<f32> {
    let size = ALIGNED_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            let pixel = aligned.get(y * size + x).copied().unwrap_or(0) as f32;
            let normalized = (pixel - ARCFACE_MEAN) / ARCFACE_STD;
            // Grayscale replicated into all three channels.
            for c in 0..3 {
                tensor[[0, c, y, x]] = normalized;
            }
        }
    }

    tensor
}
