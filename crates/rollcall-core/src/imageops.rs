//! Grayscale buffer resampling shared by the detector and the recognition engine.

/// Resize a grayscale buffer with bilinear interpolation (pixel-center aligned).
pub fn resize_bilinear(src: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let mut out = vec![0u8; new_w * new_h];
    if width == 0 || height == 0 || new_w == 0 || new_h == 0 || src.len() < width * height {
        return out;
    }

    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * width + x0] as f32;
            let tr = src[y0 * width + x1] as f32;
            let bl = src[y1 * width + x0] as f32;
            let br = src[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            out[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Downscale by `factor` in each dimension. Returns the buffer and its new size.
///
/// Output dimensions are rounded and never drop below one pixel.
pub fn downscale(src: &[u8], width: u32, height: u32, factor: f32) -> (Vec<u8>, u32, u32) {
    let new_w = ((width as f32 * factor).round() as u32).max(1);
    let new_h = ((height as f32 * factor).round() as u32).max(1);
    let out = resize_bilinear(
        src,
        width as usize,
        height as usize,
        new_w as usize,
        new_h as usize,
    );
    (out, new_w, new_h)
}

/// Copy the rectangle `[x0, x1) × [y0, y1)` out of a grayscale buffer.
///
/// The rectangle is clipped to the frame; an empty intersection yields a 0×0 crop.
pub fn crop(src: &[u8], width: u32, height: u32, x0: i64, y0: i64, x1: i64, y1: i64) -> (Vec<u8>, u32, u32) {
    let cx0 = x0.clamp(0, width as i64) as usize;
    let cy0 = y0.clamp(0, height as i64) as usize;
    let cx1 = x1.clamp(0, width as i64) as usize;
    let cy1 = y1.clamp(0, height as i64) as usize;
    if cx1 <= cx0 || cy1 <= cy0 || src.len() < width as usize * height as usize {
        return (Vec::new(), 0, 0);
    }

    let w = width as usize;
    let mut out = Vec::with_capacity((cx1 - cx0) * (cy1 - cy0));
    for y in cy0..cy1 {
        out.extend_from_slice(&src[y * w + cx0..y * w + cx1]);
    }
    (out, (cx1 - cx0) as u32, (cy1 - cy0) as u32)
}
