//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by NMS. The same type backs
//! both the streaming detector and the heavier enrollment detector; they differ
//! only in the model file and score threshold they are loaded with.

use crate::imageops;
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Default minimum score for a detection to survive decoding.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that can locate faces in a grayscale buffer.
///
/// Results are sorted by descending confidence, so the first box is the face
/// the recognition engine evaluates.
pub trait Detector {
    fn detect(&mut self, gray: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Letterbox mapping between frame space and model input space.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, target: usize) -> (Self, usize, usize) {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as usize).clamp(1, target);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, target);
        let pad_x = (target - new_w) as f32 / 2.0;
        let pad_y = (target - new_h) as f32 / 2.0;
        (Self { scale, pad_x, pad_y }, new_w, new_h)
    }

    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    score_threshold: f32,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load an SCRFD ONNX model with the default score threshold.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        Self::load_with_threshold(model_path, DEFAULT_SCORE_THRESHOLD)
    }

    /// Load an SCRFD ONNX model, keeping detections scoring above `score_threshold`.
    pub fn load_with_threshold(model_path: &str, score_threshold: f32) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2).map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::info!(
            path = model_path,
            score_threshold,
            outputs = ?output_names,
            mapping = ?stride_indices,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            score_threshold,
            stride_indices,
        })
    }

    /// Letterbox a grayscale frame into a normalized NCHW tensor.
    fn preprocess(frame: &[u8], width: usize, height: usize) -> (Array4<f32>, Letterbox) {
        let (letterbox, new_w, new_h) = Letterbox::fit(width, height, SCRFD_INPUT_SIZE);
        let resized = imageops::resize_bilinear(frame, width, height, new_w, new_h);

        let x_start = letterbox.pad_x.floor() as usize;
        let y_start = letterbox.pad_y.floor() as usize;

        // Padding with the mean normalizes to 0.0.
        let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
        for y in 0..SCRFD_INPUT_SIZE {
            for x in 0..SCRFD_INPUT_SIZE {
                let inside = y >= y_start && y < y_start + new_h && x >= x_start && x < x_start + new_w;
                let pixel = if inside {
                    resized[(y - y_start) * new_w + (x - x_start)] as f32
                } else {
                    SCRFD_MEAN
                };
                let normalized = (pixel - SCRFD_MEAN) / SCRFD_STD;
                for c in 0..3 {
                    tensor[[0, c, y, x]] = normalized;
                }
            }
        }

        (tensor, letterbox)
    }
}

impl Detector for FaceDetector {
    fn detect(&mut self, gray: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
        let (width, height) = (width as usize, height as usize);
        if width == 0 || height == 0 || gray.len() < width * height {
            return Err(DetectorError::InferenceFailed(format!(
                "frame buffer of {} bytes does not cover {width}x{height}",
                gray.len()
            )));
        }

        let (input, letterbox) = Self::preprocess(gray, width, height);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };

            let scores = extract(score_idx, "scores")?;
            let bboxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "kps")?;

            candidates.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                &letterbox,
                self.score_threshold,
            ));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::trace!(faces = faces.len(), "SCRFD detection");
        Ok(faces)
    }
}

/// Map SCRFD output tensors to stride slots.
///
/// Exports either name them `score_8`, `bbox_16`, `kps_32`, ... or use opaque
/// numeric names, in which case the standard positional layout applies:
/// [0-2] scores, [3-5] bboxes, [6-8] keypoints.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named {
        Some(found) => [found[0], found[1], found[2]],
        None => [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
    }
}

/// Decode the detections of one stride level into frame coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let bbox_off = idx * 4;
        let Some(d) = bboxes.get(bbox_off..bbox_off + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid_w) as f32 * s;
        let anchor_y = (cell / grid_w) as f32 * s;

        let (x1, y1) = letterbox.to_frame(anchor_x - d[0] * s, anchor_y - d[1] * s);
        let (x2, y2) = letterbox.to_frame(anchor_x + d[2] * s, anchor_y + d[3] * s);

        let kps_off = idx * 10;
        let landmarks = kps.get(kps_off..kps_off + 10).map(|k| {
            std::array::from_fn(|i| {
                letterbox.to_frame(anchor_x + k[i * 2] * s, anchor_y + k[i * 2 + 1] * s)
            })
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-maximum suppression. Output is sorted by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = (a.right().min(b.right()) - a.left().max(b.left())).max(0.0);
    let inter_h = (a.bottom().min(b.bottom()) - a.top().max(b.top())).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
