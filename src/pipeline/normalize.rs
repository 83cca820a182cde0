//! Image normalisation: arbitrary raster → bounded-size JPEG.
//!
//! Phone photos are routinely 4000 px and several megabytes. Sending them
//! unchanged wastes upload time and request quota without helping the model
//! read the text, so every image is scaled down until its longest side fits
//! [`DEFAULT_MAX_DIMENSION`] and re-encoded as JPEG at a fixed quality.
//!
//! The EXIF orientation tag is applied before resizing, since re-encoding
//! drops it: a portrait phone photo stored sideways reaches the model upright
//! and is capped by its displayed dimensions.
//!
//! Images that already fit are never upscaled. Re-normalising a normalised
//! image keeps its dimensions and re-encodes at the same quality target, so
//! repeated passes do not compound the downscale.

use crate::error::FieldScanError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use tracing::debug;

/// Longest side, in pixels, of a normalised image.
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

/// Default JPEG quality (0.7 on a 0–1 scale).
pub const DEFAULT_JPEG_QUALITY: u8 = 70;

/// MIME type of every normalised image.
pub const OUTPUT_MIME_TYPE: &str = "image/jpeg";

/// A compact, transmission-ready image.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedImage {
    #[serde(with = "base64_bytes")]
    data: Vec<u8>,
    mime_type: String,
    width: u32,
    height: u32,
}

impl NormalizedImage {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Base64 payload for inline request parts.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

impl fmt::Debug for NormalizedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizedImage")
            .field("mime_type", &self.mime_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Output dimensions for a `width × height` image capped at `max_dimension`.
///
/// The longest side becomes exactly `max_dimension`; the other side is
/// rounded to the nearest pixel (never below 1).
pub fn target_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dimension || longest == 0 {
        return (width, height);
    }
    let scale = |side: u32| -> u32 {
        let scaled = (side as u64 * max_dimension as u64 + longest as u64 / 2) / longest as u64;
        (scaled as u32).max(1)
    };
    if width >= height {
        (max_dimension, scale(height))
    } else {
        (scale(width), max_dimension)
    }
}

/// Normalise encoded image bytes on a blocking worker thread.
///
/// Decoding and JPEG encoding are CPU-bound; running them on the async
/// executor would stall every other in-flight request.
pub async fn normalize_image(
    bytes: Vec<u8>,
    max_dimension: u32,
    quality: u8,
) -> Result<NormalizedImage, FieldScanError> {
    tokio::task::spawn_blocking(move || normalize_bytes(&bytes, max_dimension, quality))
        .await
        .map_err(|e| FieldScanError::NormalizationUnavailable {
            detail: format!("image worker failed: {e}"),
        })?
}

/// Blocking implementation of [`normalize_image`].
pub fn normalize_bytes(
    bytes: &[u8],
    max_dimension: u32,
    quality: u8,
) -> Result<NormalizedImage, FieldScanError> {
    let img = decode_upright(bytes)?;
    let (width, height) = img.dimensions();
    let (tw, th) = target_dimensions(width, height, max_dimension);

    let img = if (tw, th) != (width, height) {
        debug!("Resizing {}x{} → {}x{}", width, height, tw, th);
        img.resize_exact(tw, th, FilterType::CatmullRom)
    } else {
        img
    };

    let rgb = flatten_on_white(&img);
    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| FieldScanError::NormalizationUnavailable {
            detail: format!("cannot encode image: {e}"),
        })?;

    debug!(
        "Normalised image {} bytes → {} bytes ({}x{})",
        bytes.len(),
        data.len(),
        tw,
        th
    );

    Ok(NormalizedImage {
        data,
        mime_type: OUTPUT_MIME_TYPE.to_string(),
        width: tw,
        height: th,
    })
}

/// Decode `bytes` and apply the EXIF orientation, if any.
fn decode_upright(bytes: &[u8]) -> Result<DynamicImage, FieldScanError> {
    let decode_failed = |e: &dyn fmt::Display| FieldScanError::NormalizationUnavailable {
        detail: format!("cannot decode image: {e}"),
    };

    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| decode_failed(&e))?
        .into_decoder()
        .map_err(|e| decode_failed(&e))?;
    let orientation = decoder.orientation().unwrap_or_else(|e| {
        debug!("Ignoring unreadable orientation metadata: {}", e);
        Orientation::NoTransforms
    });
    let mut img = DynamicImage::from_decoder(decoder).map_err(|e| decode_failed(&e))?;

    if orientation != Orientation::NoTransforms {
        debug!("Applying EXIF orientation {:?}", orientation);
        img.apply_orientation(orientation);
    }
    Ok(img)
}

/// JPEG has no alpha channel; composite transparent pixels over white so
/// scanned documents with transparency stay readable.
fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8| -> u8 {
            let a = a as u16;
            ((c as u16 * a + 255 * (255 - a) + 127) / 255) as u8
        };
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 30, 30])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .expect("png encode");
        buf
    }

    #[test]
    fn target_dimensions_no_upscale() {
        assert_eq!(target_dimensions(800, 600, 1024), (800, 600));
        assert_eq!(target_dimensions(1024, 1024, 1024), (1024, 1024));
    }

    #[test]
    fn target_dimensions_landscape_and_portrait() {
        assert_eq!(target_dimensions(2048, 1024, 1024), (1024, 512));
        assert_eq!(target_dimensions(500, 3000, 1024), (171, 1024));
        assert_eq!(target_dimensions(4000, 3, 1024), (1024, 1));
    }

    #[test]
    fn small_image_keeps_dimensions() {
        let out = normalize_bytes(&png(300, 200), DEFAULT_MAX_DIMENSION, DEFAULT_JPEG_QUALITY)
            .expect("normalise");
        assert_eq!((out.width(), out.height()), (300, 200));
        assert_eq!(out.mime_type(), "image/jpeg");
        let decoded = image::load_from_memory(out.data()).expect("valid jpeg");
        assert_eq!(decoded.dimensions(), (300, 200));
    }

    #[test]
    fn large_image_is_capped_preserving_aspect() {
        let out = normalize_bytes(&png(2400, 1600), 1024, 70).expect("normalise");
        assert_eq!(out.width(), 1024);
        assert_eq!(out.height(), 683);
        let decoded = image::load_from_memory(out.data()).expect("valid jpeg");
        assert_eq!(decoded.dimensions(), (1024, 683));
    }

    #[test]
    fn renormalising_is_stable() {
        let once = normalize_bytes(&png(2000, 1000), 1024, 70).expect("first pass");
        let twice = normalize_bytes(once.data(), 1024, 70).expect("second pass");
        assert_eq!(
            (once.width(), once.height()),
            (twice.width(), twice.height())
        );
    }

    #[test]
    fn transparent_pixels_become_white() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0])));
        let rgb = flatten_on_white(&img);
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 255, 255]);
    }

    /// A `width × height` JPEG, left half red and right half blue, carrying an
    /// EXIF block with the given orientation.
    fn jpeg_with_orientation(width: u32, height: u32, orientation: u16) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode_image(&img)
            .expect("jpeg encode");

        // Big-endian TIFF with a single IFD entry: Orientation (0x0112), SHORT.
        let mut tiff = b"MM\x00\x2a\x00\x00\x00\x08\x00\x01\x01\x12\x00\x03\x00\x00\x00\x01".to_vec();
        tiff.extend_from_slice(&orientation.to_be_bytes());
        tiff.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        let mut app1 = b"Exif\x00\x00".to_vec();
        app1.extend_from_slice(&tiff);

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&((app1.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(&app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn exif_rotation_is_applied_before_resizing() {
        let input = jpeg_with_orientation(200, 100, 6);
        let out = normalize_bytes(&input, 1024, 70).expect("normalise");
        assert_eq!((out.width(), out.height()), (100, 200));

        // Rotated 90° clockwise: the left (red) half is now on top.
        let decoded = image::load_from_memory(out.data()).expect("valid jpeg").to_rgb8();
        let top = decoded.get_pixel(50, 20).0;
        let bottom = decoded.get_pixel(50, 180).0;
        assert!(top[0] > 200 && top[2] < 60, "top {top:?}");
        assert!(bottom[2] > 200 && bottom[0] < 60, "bottom {bottom:?}");
    }

    #[test]
    fn exif_rotation_caps_displayed_long_side() {
        let input = jpeg_with_orientation(2048, 1024, 6);
        let out = normalize_bytes(&input, 1024, 70).expect("normalise");
        assert_eq!((out.width(), out.height()), (512, 1024));
    }

    #[test]
    fn exif_top_left_is_untouched() {
        let input = jpeg_with_orientation(200, 100, 1);
        let out = normalize_bytes(&input, 1024, 70).expect("normalise");
        assert_eq!((out.width(), out.height()), (200, 100));
    }

    #[test]
    fn garbage_bytes_fail_fast() {
        let err = normalize_bytes(b"definitely not an image", 1024, 70).unwrap_err();
        assert!(matches!(err, FieldScanError::NormalizationUnavailable { .. }));
    }

    #[test]
    fn serde_round_trips_as_base64() {
        let out = normalize_bytes(&png(10, 10), 1024, 70).expect("normalise");
        let json = serde_json::to_string(&out).expect("serialise");
        assert!(json.contains(&out.to_base64()));
        let back: NormalizedImage = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(back, out);
    }

    #[tokio::test]
    async fn async_normalise_runs_on_worker() {
        let out = normalize_image(png(1500, 100), 1024, 70).await.expect("normalise");
        assert_eq!(out.width(), 1024);
    }
}
