//! Image preprocessing for OCR models
//!
//! Handles image resizing, normalization, and tensor conversion for the
//! PaddleOCR detection and recognition models.

use image::RgbImage;
use ndarray::{Array3, Array4};

/// Preprocessing configuration
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Target size for the detection model's longest side (typically 640 or 960)
    pub det_target_size: u32,
    /// Target height for recognition model (typically 32 or 48)
    pub rec_target_height: u32,
    /// Maximum width for recognition
    pub rec_max_width: u32,
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            det_target_size: 960,
            rec_target_height: 48,
            rec_max_width: 640,
            // PaddleOCR uses simple 0-1 normalization (not ImageNet style):
            // (pixel / 255.0 - 0.5) / 0.5 maps [0, 255] -> [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

/// Convert an RGB image to an HWC f32 array with values in 0-1
pub fn image_to_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut rgb = Array3::<f32>::zeros((height as usize, width as usize, 3));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            rgb[[y as usize, x as usize, c]] = pixel.0[c] as f32 / 255.0;
        }
    }

    rgb
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let mut normalized = Array3::<f32>::zeros((h, w, 3));

    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                normalized[[y, x, c]] = (image[[y, x, c]] - mean[c]) / std[c];
            }
        }
    }

    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Resize image to target size while maintaining aspect ratio
/// Returns (resized_image, scale_factor)
pub fn resize_for_detection(image: &Array3<f32>, target_size: u32) -> (Array3<f32>, f32) {
    let (h, w, c) = image.dim();
    let h = h as f32;
    let w = w as f32;

    // Calculate scale to fit within target_size
    let scale = (target_size as f32 / h.max(w)).min(1.0);
    let new_h = ((h * scale) as usize).max(1);
    let new_w = ((w * scale) as usize).max(1);

    // Pad to make dimensions divisible by 32 (required by model)
    let padded_h = new_h.div_ceil(32) * 32;
    let padded_w = new_w.div_ceil(32) * 32;

    // Bilinear interpolation resize
    let mut resized = Array3::<f32>::zeros((padded_h, padded_w, c));

    for y in 0..new_h {
        for x in 0..new_w {
            let src_y = (y as f32 / scale).min(h - 1.0);
            let src_x = (x as f32 / scale).min(w - 1.0);

            let y0 = src_y.floor() as usize;
            let y1 = (y0 + 1).min(h as usize - 1);
            let x0 = src_x.floor() as usize;
            let x1 = (x0 + 1).min(w as usize - 1);

            let fy = src_y - y0 as f32;
            let fx = src_x - x0 as f32;

            for ch in 0..c {
                let v00 = image[[y0, x0, ch]];
                let v01 = image[[y0, x1, ch]];
                let v10 = image[[y1, x0, ch]];
                let v11 = image[[y1, x1, ch]];

                let v0 = v00 * (1.0 - fx) + v01 * fx;
                let v1 = v10 * (1.0 - fx) + v11 * fx;
                resized[[y, x, ch]] = v0 * (1.0 - fy) + v1 * fy;
            }
        }
    }

    (resized, scale)
}

/// Resize image for the recognition model (fixed height, variable width)
pub fn resize_for_recognition(
    image: &Array3<f32>,
    target_height: u32,
    max_width: u32,
) -> Array3<f32> {
    let (h, w, c) = image.dim();
    let h_f = h as f32;
    let w_f = w as f32;

    // Scale to target height
    let scale = target_height as f32 / h_f;
    let new_w = (((w_f * scale) as u32).clamp(1, max_width)) as usize;
    let new_h = target_height as usize;

    let mut resized = Array3::<f32>::zeros((new_h, new_w, c));

    for y in 0..new_h {
        for x in 0..new_w {
            let src_y = (y as f32 / scale).min(h_f - 1.0);
            let src_x = (x as f32 * w_f / new_w as f32).min(w_f - 1.0);

            let y0 = src_y.floor() as usize;
            let y1 = (y0 + 1).min(h - 1);
            let x0 = src_x.floor() as usize;
            let x1 = (x0 + 1).min(w - 1);

            let fy = src_y - y0 as f32;
            let fx = src_x - x0 as f32;

            for ch in 0..c {
                let v00 = image[[y0, x0, ch]];
                let v01 = image[[y0, x1, ch]];
                let v10 = image[[y1, x0, ch]];
                let v11 = image[[y1, x1, ch]];

                let v0 = v00 * (1.0 - fx) + v01 * fx;
                let v1 = v10 * (1.0 - fx) + v11 * fx;
                resized[[y, x, ch]] = v0 * (1.0 - fy) + v1 * fy;
            }
        }
    }

    resized
}

/// Crop a rectangular region from an HWC image, clamped to bounds
pub fn crop_region(
    image: &Array3<f32>,
    x: usize,
    y: usize,
    width: usize,
    height: usize,
) -> Array3<f32> {
    let (img_h, img_w, c) = image.dim();

    let x1 = x.min(img_w.saturating_sub(1));
    let y1 = y.min(img_h.saturating_sub(1));
    let x2 = (x + width).min(img_w);
    let y2 = (y + height).min(img_h);

    let crop_w = x2.saturating_sub(x1);
    let crop_h = y2.saturating_sub(y1);

    if crop_w == 0 || crop_h == 0 {
        return Array3::<f32>::zeros((1, 1, c));
    }

    let mut cropped = Array3::<f32>::zeros((crop_h, crop_w, c));

    for cy in 0..crop_h {
        for cx in 0..crop_w {
            for ch in 0..c {
                cropped[[cy, cx, ch]] = image[[y1 + cy, x1 + cx, ch]];
            }
        }
    }

    cropped
}

/// Full preprocessing pipeline for detection
pub fn preprocess_for_detection(
    image: &Array3<f32>,
    config: &PreprocessConfig,
) -> (Array4<f32>, f32) {
    let (resized, scale) = resize_for_detection(image, config.det_target_size);
    let normalized = normalize(&resized, &config.mean, &config.std);
    let tensor = hwc_to_nchw(&normalized);

    (tensor, scale)
}

/// Full preprocessing pipeline for recognition
pub fn preprocess_for_recognition(image: &Array3<f32>, config: &PreprocessConfig) -> Array4<f32> {
    let resized = resize_for_recognition(image, config.rec_target_height, config.rec_max_width);
    let normalized = normalize(&resized, &config.mean, &config.std);
    hwc_to_nchw(&normalized)
}
