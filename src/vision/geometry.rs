//! Geometry normalization for uploaded images
//!
//! Canonicalizes arbitrary decoded input (grayscale, RGBA, color) into
//! 3-channel RGB, applies an optional clamped crop and an optional
//! quarter-turn rotation. Everything downstream of this module assumes a
//! 3-channel image.

use image::{imageops, DynamicImage, RgbImage};
use thiserror::Error;
use tracing::debug;

/// Declared channel order of a decoded 3-channel source.
///
/// Decoders in this crate produce RGB, but the rule is kept explicit so a
/// source that declares BGR gets its channels swapped instead of silently
/// passing through in the wrong order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Requested crop rectangle, origin at top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// How to treat rotation values that are not a quarter turn after modulo
/// reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationPolicy {
    /// Silently leave the image untouched (matches the historical behavior).
    #[default]
    Permissive,
    /// Reject the request with a validation error.
    Strict,
}

/// Errors produced while normalizing request geometry. All of these are
/// client errors.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// Carries the clamped values so the caller can see what was actually
    /// rejected.
    #[error("invalid bounding box: x={x}, y={y}, w={width}, h={height}")]
    InvalidCrop {
        x: i64,
        y: i64,
        width: i64,
        height: i64,
    },

    #[error("unsupported rotation angle: {0} (expected a multiple of 90)")]
    InvalidRotation(i32),
}

/// Decode raw upload bytes into a pixel image. Any container format the
/// `image` crate understands is accepted.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, GeometryError> {
    image::load_from_memory(bytes).map_err(|e| GeometryError::Decode(e.to_string()))
}

/// Canonicalize a decoded image into 3-channel RGB.
///
/// Grayscale input is expanded to three identical channels, an alpha channel
/// is dropped, and a source-declared BGR order gets its channels swapped.
pub fn canonicalize(image: DynamicImage, order: ChannelOrder) -> RgbImage {
    let mut rgb = image.into_rgb8();

    if order == ChannelOrder::Bgr {
        for pixel in rgb.pixels_mut() {
            pixel.0.swap(0, 2);
        }
    }

    rgb
}

/// Crop with boundary clamping.
///
/// `x` and `y` are clamped to >= 0, then `width` and `height` are clamped so
/// the rectangle fits within the image measured from the clamped origin. A
/// rectangle that clamps to a non-positive extent is an error, not a no-op.
pub fn crop(image: &RgbImage, rect: &CropRect) -> Result<RgbImage, GeometryError> {
    let (img_w, img_h) = (i64::from(image.width()), i64::from(image.height()));

    let x = i64::from(rect.x).max(0);
    let y = i64::from(rect.y).max(0);
    let width = i64::from(rect.width).min(img_w - x);
    let height = i64::from(rect.height).min(img_h - y);

    if width <= 0 || height <= 0 {
        return Err(GeometryError::InvalidCrop {
            x,
            y,
            width,
            height,
        });
    }

    debug!("cropping image to x={x}, y={y}, w={width}, h={height}");

    Ok(imageops::crop_imm(image, x as u32, y as u32, width as u32, height as u32).to_image())
}

/// Apply a clockwise quarter-turn rotation.
///
/// The input degrees are reduced modulo 360 first, so e.g. 450 behaves as 90.
/// Residues other than {0, 90, 180, 270} are a no-op under
/// [`RotationPolicy::Permissive`] and an error under
/// [`RotationPolicy::Strict`].
pub fn rotate(
    image: RgbImage,
    degrees: i32,
    policy: RotationPolicy,
) -> Result<RgbImage, GeometryError> {
    let normalized = degrees.rem_euclid(360);

    match normalized {
        0 => Ok(image),
        90 => Ok(imageops::rotate90(&image)),
        180 => Ok(imageops::rotate180(&image)),
        270 => Ok(imageops::rotate270(&image)),
        other => match policy {
            RotationPolicy::Permissive => {
                debug!("ignoring non-quarter-turn rotation of {other} degrees");
                Ok(image)
            }
            RotationPolicy::Strict => Err(GeometryError::InvalidRotation(degrees)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    fn solid_rgb(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([10, 20, 30]))
    }

    fn encode_png(image: &DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_grayscale_expands_to_three_channels() {
        let gray = GrayImage::from_pixel(4, 3, Luma([200]));
        let bytes = encode_png(&DynamicImage::ImageLuma8(gray));

        let decoded = decode_image(&bytes).unwrap();
        let rgb = canonicalize(decoded, ChannelOrder::Rgb);

        assert_eq!(rgb.dimensions(), (4, 3));
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([200, 200, 200]));
    }

    #[test]
    fn test_alpha_channel_is_dropped() {
        let rgba = RgbaImage::from_pixel(2, 2, Rgba([5, 6, 7, 128]));
        let rgb = canonicalize(DynamicImage::ImageRgba8(rgba), ChannelOrder::Rgb);

        assert_eq!(rgb.get_pixel(1, 1), &Rgb([5, 6, 7]));
    }

    #[test]
    fn test_bgr_order_swaps_channels() {
        let rgb_source = solid_rgb(2, 2);
        let swapped = canonicalize(DynamicImage::ImageRgb8(rgb_source), ChannelOrder::Bgr);

        assert_eq!(swapped.get_pixel(0, 0), &Rgb([30, 20, 10]));
    }

    #[test]
    fn test_undecodable_bytes_error() {
        let result = decode_image(b"definitely not an image");
        assert!(matches!(result, Err(GeometryError::Decode(_))));
    }

    #[test]
    fn test_crop_in_bounds_has_exact_dimensions() {
        let image = solid_rgb(100, 80);
        let rect = CropRect {
            x: 10,
            y: 20,
            width: 30,
            height: 40,
        };

        let cropped = crop(&image, &rect).unwrap();
        assert_eq!(cropped.dimensions(), (30, 40));
    }

    #[test]
    fn test_crop_clamps_to_image_bounds() {
        // Requested 50x50 at (90, 90) of a 100x100 image clamps to 10x10.
        let image = solid_rgb(100, 100);
        let rect = CropRect {
            x: 90,
            y: 90,
            width: 50,
            height: 50,
        };

        let cropped = crop(&image, &rect).unwrap();
        assert_eq!(cropped.dimensions(), (10, 10));
    }

    #[test]
    fn test_crop_negative_origin_is_clamped() {
        let image = solid_rgb(20, 20);
        let rect = CropRect {
            x: -5,
            y: -5,
            width: 10,
            height: 10,
        };

        let cropped = crop(&image, &rect).unwrap();
        assert_eq!(cropped.dimensions(), (10, 10));
    }

    #[test]
    fn test_crop_outside_bounds_is_rejected() {
        let image = solid_rgb(50, 50);
        let rect = CropRect {
            x: 60,
            y: 10,
            width: 20,
            height: 20,
        };

        match crop(&image, &rect) {
            Err(GeometryError::InvalidCrop { width, .. }) => assert!(width <= 0),
            other => panic!("expected InvalidCrop, got {:?}", other.map(|i| i.dimensions())),
        }
    }

    #[test]
    fn test_crop_zero_extent_is_rejected() {
        let image = solid_rgb(50, 50);
        let rect = CropRect {
            x: 10,
            y: 10,
            width: 0,
            height: 5,
        };

        assert!(matches!(
            crop(&image, &rect),
            Err(GeometryError::InvalidCrop { .. })
        ));
    }

    #[test]
    fn test_rotate_90_swaps_dimensions() {
        let image = solid_rgb(30, 10);
        let rotated = rotate(image, 90, RotationPolicy::Permissive).unwrap();
        assert_eq!(rotated.dimensions(), (10, 30));
    }

    #[test]
    fn test_rotate_90_is_clockwise() {
        // Two pixels side by side; after a clockwise quarter turn the left
        // pixel ends up on top.
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 0, 255]));

        let rotated = rotate(image, 90, RotationPolicy::Permissive).unwrap();
        assert_eq!(rotated.dimensions(), (1, 2));
        assert_eq!(rotated.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(rotated.get_pixel(0, 1), &Rgb([0, 0, 255]));
    }

    #[test]
    fn test_rotate_90_then_270_restores_dimensions() {
        let image = solid_rgb(30, 10);
        let once = rotate(image, 90, RotationPolicy::Permissive).unwrap();
        assert_eq!(once.dimensions(), (10, 30));

        let back = rotate(once, 270, RotationPolicy::Permissive).unwrap();
        assert_eq!(back.dimensions(), (30, 10));
    }

    #[test]
    fn test_rotate_450_normalizes_to_90() {
        let image = solid_rgb(30, 10);
        let rotated = rotate(image, 450, RotationPolicy::Permissive).unwrap();
        assert_eq!(rotated.dimensions(), (10, 30));
    }

    #[test]
    fn test_rotate_zero_is_identity() {
        let image = solid_rgb(7, 5);
        let rotated = rotate(image.clone(), 0, RotationPolicy::Strict).unwrap();
        assert_eq!(rotated, image);
    }

    #[test]
    fn test_rotate_non_quarter_turn_permissive_noop() {
        let image = solid_rgb(7, 5);
        let rotated = rotate(image.clone(), 37, RotationPolicy::Permissive).unwrap();
        assert_eq!(rotated, image);
    }

    #[test]
    fn test_rotate_non_quarter_turn_strict_rejected() {
        let image = solid_rgb(7, 5);
        assert!(matches!(
            rotate(image, 37, RotationPolicy::Strict),
            Err(GeometryError::InvalidRotation(37))
        ));
    }

    #[test]
    fn test_rotate_negative_is_reduced_modulo_360() {
        // -90 is equivalent to 270 clockwise.
        let image = solid_rgb(30, 10);
        let rotated = rotate(image, -90, RotationPolicy::Strict).unwrap();
        assert_eq!(rotated.dimensions(), (10, 30));
    }
}
