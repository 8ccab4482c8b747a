//! Face alignment to the canonical ArcFace crop.
//!
//! A 4-DOF similarity transform (scale, rotation, translation) is fitted from
//! the five detected landmarks to the InsightFace reference positions, then
//! optionally perturbed for jittered re-sampling.

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// Small perturbation applied to an alignment before warping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter {
    /// Scale about the crop center.
    pub scale: f32,
    /// Translation in output pixels.
    pub dx: f32,
    pub dy: f32,
}

impl Jitter {
    pub const NONE: Jitter = Jitter {
        scale: 1.0,
        dx: 0.0,
        dy: 0.0,
    };

    /// Deterministic set of `count` jitters. The first is always [`Jitter::NONE`].
    pub fn series(count: usize) -> Vec<Jitter> {
        const PATTERN: [(f32, f32, f32); 8] = [
            (1.05, 0.0, 0.0),
            (0.95, 0.0, 0.0),
            (1.0, 2.0, 0.0),
            (1.0, -2.0, 0.0),
            (1.0, 0.0, 2.0),
            (1.0, 0.0, -2.0),
            (1.03, 1.5, 1.5),
            (0.97, -1.5, -1.5),
        ];

        let count = count.max(1);
        std::iter::once(Jitter::NONE)
            .chain(
                PATTERN
                    .iter()
                    .cycle()
                    .map(|&(scale, dx, dy)| Jitter { scale, dx, dy }),
            )
            .take(count)
            .collect()
    }
}

/// Similarity transform mapping frame coordinates to aligned-crop coordinates:
///
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
struct SimilarityTransform {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl SimilarityTransform {
    /// Least-squares fit from `src` to `dst` point pairs.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        // Each pair contributes two rows of the normal equations:
        //   [sx, -sy, 1, 0] · [a, b, tx, ty] = dx
        //   [sy,  sx, 0, 1] · [a, b, tx, ty] = dy
        let mut ata = [[0.0f32; 4]; 4];
        let mut atb = [0.0f32; 4];

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let r1 = [sx, -sy, 1.0, 0.0];
            let r2 = [sy, sx, 0.0, 1.0];
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += r1[j] * r1[k] + r2[j] * r2[k];
                }
                atb[j] += r1[j] * dx + r2[j] * dy;
            }
        }

        match solve_4x4(ata, atb) {
            Some([a, b, tx, ty]) => Self { a, b, tx, ty },
            None => Self {
                a: 1.0,
                b: 0.0,
                tx: 0.0,
                ty: 0.0,
            },
        }
    }

    /// Compose with a jitter applied around the center of the output crop.
    fn jittered(self, jitter: Jitter, out_size: usize) -> Self {
        let c = out_size as f32 / 2.0;
        let s = jitter.scale;
        Self {
            a: self.a * s,
            b: self.b * s,
            tx: s * (self.tx - c) + c + jitter.dx,
            ty: s * (self.ty - c) + c + jitter.dy,
        }
    }

    /// Warp `frame` into an `out_size`² crop with bilinear sampling; outside pixels are black.
    fn warp(&self, frame: &[u8], width: usize, height: usize, out_size: usize) -> Vec<u8> {
        let mut output = vec![0u8; out_size * out_size];

        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 || frame.len() < width * height {
            return output;
        }
        let ia = self.a / det;
        let ib = self.b / det;

        let sample = |x: i32, y: i32| -> f32 {
            if x >= 0 && y >= 0 && (x as usize) < width && (y as usize) < height {
                frame[y as usize * width + x as usize] as f32
            } else {
                0.0
            }
        };

        for oy in 0..out_size {
            for ox in 0..out_size {
                // Inverse map: src = M⁻¹ · (dst − t)
                let dx = ox as f32 - self.tx;
                let dy = oy as f32 - self.ty;
                let sx = ia * dx + ib * dy;
                let sy = -ib * dx + ia * dy;

                let x0 = sx.floor() as i32;
                let y0 = sy.floor() as i32;
                let fx = sx - x0 as f32;
                let fy = sy - y0 as f32;

                let val = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1) * fx * fy;

                output[oy * out_size + ox] = val.round().clamp(0.0, 255.0) as u8;
            }
        }

        output
    }
}

/// Gaussian elimination with partial pivoting. `None` for a singular system.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(a: [[f32; 4]; 4], b: [f32; 4]) -> Option<[f32; 4]> {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&a[i]);
        m[i][4] = b[i];
    }

    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r1, &r2| {
                m[r1][col]
                    .abs()
                    .partial_cmp(&m[r2][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (m[i][4] - tail) / m[i][i];
    }
    Some(x)
}

/// Align a face to the canonical 112×112 crop.
pub fn align_face(frame: &[u8], width: u32, height: u32, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    align_face_jittered(frame, width, height, landmarks, Jitter::NONE)
}

/// Align a face to the canonical crop with a perturbation applied.
pub fn align_face_jittered(
    frame: &[u8],
    width: u32,
    height: u32,
    landmarks: &[(f32, f32); 5],
    jitter: Jitter,
) -> Vec<u8> {
    SimilarityTransform::estimate(landmarks, &REFERENCE_LANDMARKS_112)
        .jittered(jitter, ALIGNED_SIZE)
        .warp(frame, width as usize, height as usize, ALIGNED_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let t = SimilarityTransform::estimate(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112);
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3, "tx = {}", t.tx);
        assert!(t.ty.abs() < 1e-3, "ty = {}", t.ty);
    }

    #[test]
    fn test_half_scale_transform() {
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = SimilarityTransform::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert!((t.a - 0.5).abs() < 0.01, "a = {}", t.a);
    }

    #[test]
    fn test_singular_system_falls_back_to_identity() {
        let t = SimilarityTransform::estimate(&[(0.0, 0.0); 5], &[(0.0, 0.0); 5]);
        assert_eq!(t.a, 1.0);
        assert_eq!(t.b, 0.0);
    }

    #[test]
    fn test_jitter_none_is_noop() {
        let t = SimilarityTransform {
            a: 0.8,
            b: 0.1,
            tx: 3.0,
            ty: -4.0,
        };
        assert_eq!(t.jittered(Jitter::NONE, ALIGNED_SIZE), t);
    }

    #[test]
    fn test_jitter_series() {
        assert_eq!(Jitter::series(0), vec![Jitter::NONE]);
        let three = Jitter::series(3);
        assert_eq!(three.len(), 3);
        assert_eq!(three[0], Jitter::NONE);
        assert_ne!(three[1], three[2]);
        assert_eq!(Jitter::series(20).len(), 20);
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = vec![128u8; 640 * 480];
        let aligned = align_face(&frame, 640, 480, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.len(), ALIGNED_SIZE * ALIGNED_SIZE);
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        let (w, h) = (200usize, 200usize);
        let mut frame = vec![0u8; w * h];
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // 5x5 bright patch on the left eye.
        for y in 58..63 {
            for x in 78..83 {
                frame[y * w + x] = 255;
            }
        }

        let aligned = align_face(&frame, w as u32, h as u32, &src);
        let rx = REFERENCE_LANDMARKS_112[0].0.round() as usize;
        let ry = REFERENCE_LANDMARKS_112[0].1.round() as usize;
        let peak = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned[y * ALIGNED_SIZE + x])
            .max()
            .unwrap_or(0);
        assert!(peak > 100, "expected bright patch near ({rx}, {ry}), peak={peak}");
    }
}
