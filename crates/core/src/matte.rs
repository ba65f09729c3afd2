//! Difference matting and threshold transparency.
//!
//! [`matte`] reconstructs alpha and un-premultiplied color from two renders
//! of the same subject, one on pure white and one on pure black. A pixel that
//! looks the same on both backgrounds is opaque; a pixel whose white-render
//! and black-render colors differ by the full white/black distance is fully
//! transparent. Foreground colors that are themselves pure white or pure
//! black are mis-estimated when partially transparent; that is inherent to
//! difference matting.
//!
//! Every pixel is independent, so both passes run data-parallel.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{ImageFormat, RgbaImage};
use rayon::prelude::*;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Euclidean distance between pure white and pure black in RGB space.
pub const MAX_COLOR_DISTANCE: f32 = 441.672_94; // sqrt(3 * 255^2)

/// Below this alpha the recovered color is defined as black.
pub const MIN_UNPREMULTIPLY_ALPHA: f32 = 0.01;

/// Minimum channel value at which the threshold pass treats a pixel as
/// fully background.
pub const BACKGROUND_THRESHOLD: u8 = 240;

/// Minimum channel value at which the threshold pass starts fading a pixel.
pub const FADE_THRESHOLD: u8 = 200;

/// MIME type of matted output.
pub const PNG_MIME: &str = "image/png";

// ---------------------------------------------------------------------------
// Difference matting
// ---------------------------------------------------------------------------

/// Matte a single pixel from its white- and black-background colors.
pub fn matte_pixel(white: [u8; 3], black: [u8; 3]) -> [u8; 4] {
    let distance = white
        .iter()
        .zip(black.iter())
        .map(|(&w, &b)| {
            let d = w as f32 - b as f32;
            d * d
        })
        .sum::<f32>()
        .sqrt();
    let alpha = (1.0 - distance / MAX_COLOR_DISTANCE).clamp(0.0, 1.0);

    let [r, g, b] = if alpha > MIN_UNPREMULTIPLY_ALPHA {
        black.map(|c| (c as f32 / alpha).round().clamp(0.0, 255.0) as u8)
    } else {
        [0, 0, 0]
    };
    [r, g, b, (alpha * 255.0).round() as u8]
}

/// Reconstruct an RGBA image from white- and black-background renders.
///
/// When the renders differ in size the black render is resampled to the
/// white render's dimensions first.
pub fn matte(white: &RgbaImage, black: &RgbaImage) -> RgbaImage {
    let (width, height) = white.dimensions();
    let resampled;
    let black = if black.dimensions() != (width, height) {
        tracing::debug!(
            white_width = width,
            white_height = height,
            black_width = black.width(),
            black_height = black.height(),
            "Resampling black render to match white render"
        );
        resampled = image::imageops::resize(black, width, height, FilterType::Triangle);
        &resampled
    } else {
        black
    };

    let mut out = RgbaImage::new(width, height);
    out.par_chunks_exact_mut(4)
        .zip(white.par_chunks_exact(4))
        .zip(black.par_chunks_exact(4))
        .for_each(|((dst, w), b)| {
            dst.copy_from_slice(&matte_pixel([w[0], w[1], w[2]], [b[0], b[1], b[2]]));
        });
    out
}

// ---------------------------------------------------------------------------
// Threshold transparency
// ---------------------------------------------------------------------------

/// Alpha multiplier for a pixel on a light background, in `[0, 1]`.
fn threshold_factor(rgb: [u8; 3]) -> f32 {
    let min = rgb.into_iter().min().unwrap_or(0);
    if min >= BACKGROUND_THRESHOLD {
        0.0
    } else if min >= FADE_THRESHOLD {
        (BACKGROUND_THRESHOLD - min) as f32 / (BACKGROUND_THRESHOLD - FADE_THRESHOLD) as f32
    } else {
        1.0
    }
}

/// Make near-white pixels transparent without any network round-trip.
///
/// Pixels whose darkest channel is at least [`BACKGROUND_THRESHOLD`] become
/// fully transparent; between [`FADE_THRESHOLD`] and that value alpha ramps
/// down linearly. Colors are left unchanged.
pub fn threshold_transparency(source: &RgbaImage) -> RgbaImage {
    let mut out = source.clone();
    out.par_chunks_exact_mut(4).for_each(|px| {
        let factor = threshold_factor([px[0], px[1], px[2]]);
        px[3] = (px[3] as f32 * factor).round() as u8;
    });
    out
}

// ---------------------------------------------------------------------------
// Codecs
// ---------------------------------------------------------------------------

/// Decode any supported encoded image into RGBA8.
pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage, CoreError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| CoreError::ImageCodec(e.to_string()))
}

/// Encode an RGBA8 buffer as PNG.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CoreError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| CoreError::ImageCodec(e.to_string()))?;
    Ok(buf.into_inner())
}

/// Mime type of an encoded image, sniffed from its leading bytes.
pub fn sniff_mime_type(bytes: &[u8]) -> Result<&'static str, CoreError> {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .map_err(|e| CoreError::ImageCodec(e.to_string()))
}

/// Decode both renders, matte them, and encode the result as PNG.
pub fn matte_encoded(white: &[u8], black: &[u8]) -> Result<Vec<u8>, CoreError> {
    let white = decode_rgba(white)?;
    let black = decode_rgba(black)?;
    encode_png(&matte(&white, &black))
}

/// Decode an image, apply [`threshold_transparency`], and encode as PNG.
pub fn threshold_encoded(source: &[u8]) -> Result<Vec<u8>, CoreError> {
    encode_png(&threshold_transparency(&decode_rgba(source)?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(rgba))
    }

    // -- Per-pixel model ----------------------------------------------------

    #[test]
    fn identical_pixels_are_opaque() {
        for rgb in [[0, 0, 0], [255, 255, 255], [12, 200, 77], [128, 128, 128]] {
            assert_eq!(matte_pixel(rgb, rgb)[3], 255);
        }
    }

    #[test]
    fn identical_pixels_keep_their_color() {
        assert_eq!(matte_pixel([12, 200, 77], [12, 200, 77]), [12, 200, 77, 255]);
    }

    #[test]
    fn white_versus_black_is_transparent() {
        assert_eq!(matte_pixel([255, 255, 255], [0, 0, 0]), [0, 0, 0, 0]);
    }

    #[test]
    fn half_transparent_red_is_recovered() {
        // Red at 50% over white is (255,128,128); over black it is (128,0,0).
        let px = matte_pixel([255, 128, 128], [128, 0, 0]);
        assert!((px[3] as i32 - 128).abs() <= 20, "alpha was {}", px[3]);
        assert!(px[0] > 200, "red channel was {}", px[0]);
        assert_eq!(px[1], 0);
        assert_eq!(px[2], 0);
    }

    #[test]
    fn near_zero_alpha_color_is_black() {
        let px = matte_pixel([254, 254, 254], [1, 1, 1]);
        assert_eq!(&px[..3], &[0, 0, 0]);
    }

    // -- Buffers ------------------------------------------------------------

    #[test]
    fn all_white_in_both_renders_is_opaque() {
        let white = solid(2, 2, [255, 255, 255, 255]);
        let out = matte(&white, &white);
        assert!(out.pixels().all(|p| p.0[3] == 255));
    }

    #[test]
    fn white_render_white_black_render_black_is_transparent() {
        let white = solid(2, 2, [255, 255, 255, 255]);
        let black = solid(2, 2, [0, 0, 0, 255]);
        let out = matte(&white, &black);
        assert!(out.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn matte_is_deterministic() {
        let mut white = solid(3, 2, [255, 255, 255, 255]);
        let mut black = solid(3, 2, [0, 0, 0, 255]);
        white.put_pixel(1, 1, Rgba([40, 90, 200, 255]));
        black.put_pixel(1, 1, Rgba([40, 90, 200, 255]));
        white.put_pixel(2, 0, Rgba([200, 180, 180, 255]));
        black.put_pixel(2, 0, Rgba([100, 30, 30, 255]));
        assert_eq!(matte(&white, &black), matte(&white, &black));
        assert_eq!(matte(&white, &black).get_pixel(1, 1).0, [40, 90, 200, 255]);
    }

    #[test]
    fn mismatched_sizes_resample_black_render() {
        let white = solid(4, 4, [10, 20, 30, 255]);
        let black = solid(2, 2, [10, 20, 30, 255]);
        let out = matte(&white, &black);
        assert_eq!(out.dimensions(), (4, 4));
        assert!(out.pixels().all(|p| p.0 == [10, 20, 30, 255]));
    }

    // -- Threshold pass -----------------------------------------------------

    #[test]
    fn threshold_clears_light_background() {
        let mut img = solid(2, 1, [250, 250, 250, 255]);
        img.put_pixel(1, 0, Rgba([30, 40, 50, 255]));
        let out = threshold_transparency(&img);
        assert_eq!(out.get_pixel(0, 0).0[3], 0);
        assert_eq!(out.get_pixel(1, 0).0, [30, 40, 50, 255]);
    }

    #[test]
    fn threshold_fades_between_bounds() {
        let img = solid(1, 1, [220, 220, 230, 255]);
        let alpha = threshold_transparency(&img).get_pixel(0, 0).0[3];
        assert!(alpha > 0 && alpha < 255, "alpha was {alpha}");
    }

    // -- Codecs -------------------------------------------------------------

    #[test]
    fn encoded_matte_round_trip() {
        let white = encode_png(&solid(2, 2, [255, 255, 255, 255])).unwrap();
        let black = encode_png(&solid(2, 2, [0, 0, 0, 255])).unwrap();
        let out = decode_rgba(&matte_encoded(&white, &black).unwrap()).unwrap();
        assert_eq!(out.dimensions(), (2, 2));
        assert!(out.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn png_mime_type_is_sniffed() {
        let png = encode_png(&solid(1, 1, [1, 2, 3, 255])).unwrap();
        assert_eq!(sniff_mime_type(&png).unwrap(), "image/png");
        assert!(sniff_mime_type(b"plain text").is_err());
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            decode_rgba(b"not an image"),
            Err(CoreError::ImageCodec(_))
        ));
    }
}
