//! Image format detection and transcoding.
//!
//! Strict readers only render JPEG, PNG and GIF. WebP is re-encoded as JPEG,
//! SVG is rasterized to PNG, and other decodable raster formats become PNG.
//! When a conversion fails the original bytes are kept so the content is
//! still shipped.

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use resvg::{tiny_skia, usvg};
use thiserror::Error;

/// Encoded image format, as far as packaging cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    WebP,
    Svg,
    /// Any other `image/*` type, holding its media type.
    Other(String),
}

impl ImageKind {
    /// Parse a `Content-Type` value. Parameters are ignored; non-image types
    /// yield `None`.
    pub fn from_media_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let kind = match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => ImageKind::Jpeg,
            "image/png" | "image/apng" => ImageKind::Png,
            "image/gif" => ImageKind::Gif,
            "image/webp" => ImageKind::WebP,
            "image/svg+xml" | "image/svg" => ImageKind::Svg,
            other if other.starts_with("image/") && other.len() > "image/".len() => {
                ImageKind::Other(essence)
            }
            _ => return None,
        };
        Some(kind)
    }

    /// Guess from a URL path's file extension.
    pub fn from_extension(path: &str) -> Option<Self> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "jpg" | "jpeg" | "jpe" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            "gif" => Some(ImageKind::Gif),
            "webp" => Some(ImageKind::WebP),
            "svg" | "svgz" => Some(ImageKind::Svg),
            "bmp" => Some(ImageKind::Other("image/bmp".to_string())),
            "tif" | "tiff" => Some(ImageKind::Other("image/tiff".to_string())),
            "ico" => Some(ImageKind::Other("image/x-icon".to_string())),
            "avif" => Some(ImageKind::Other("image/avif".to_string())),
            _ => None,
        }
    }

    /// Identify the format from magic bytes.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        match image::guess_format(data) {
            Ok(ImageFormat::Jpeg) => return Some(ImageKind::Jpeg),
            Ok(ImageFormat::Png) => return Some(ImageKind::Png),
            Ok(ImageFormat::Gif) => return Some(ImageKind::Gif),
            Ok(ImageFormat::WebP) => return Some(ImageKind::WebP),
            Ok(format) => {
                return format
                    .to_mime_type()
                    .starts_with("image/")
                    .then(|| ImageKind::Other(format.to_mime_type().to_string()));
            }
            Err(_) => {}
        }

        looks_like_svg(data).then_some(ImageKind::Svg)
    }

    pub fn media_type(&self) -> &str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
            ImageKind::WebP => "image/webp",
            ImageKind::Svg => "image/svg+xml",
            ImageKind::Other(media_type) => media_type,
        }
    }

    /// File extension for packaged files of this kind.
    pub fn extension(&self) -> &str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
            ImageKind::WebP => "webp",
            ImageKind::Svg => "svg",
            ImageKind::Other(media_type) => match media_type.as_str() {
                "image/bmp" => "bmp",
                "image/tiff" => "tiff",
                "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
                "image/avif" => "avif",
                _ => "img",
            },
        }
    }

    /// Whether every strict reader can display this format.
    pub fn is_universal(&self) -> bool {
        matches!(self, ImageKind::Jpeg | ImageKind::Png | ImageKind::Gif)
    }
}

/// `<svg` within the first kilobyte, after an optional XML prolog.
fn looks_like_svg(data: &[u8]) -> bool {
    let head = &data[..data.len().min(1024)];
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    (text.starts_with("<svg") || text.starts_with("<?xml") || text.starts_with("<!DOCTYPE svg"))
        && text.contains("<svg")
}

/// Image bytes tagged with their format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub kind: ImageKind,
}

impl EncodedImage {
    pub fn new(data: Vec<u8>, kind: ImageKind) -> Self {
        Self { data, kind }
    }
}

/// Why a conversion did not happen.
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("decode failed: {0}")]
    Decode(image::ImageError),

    #[error("encode failed: {0}")]
    Encode(image::ImageError),

    #[error("SVG rasterization failed: {0}")]
    Rasterize(String),
}

/// Result of [`transcode`]. The manifest must use the media type of
/// whichever image comes out.
#[derive(Debug)]
pub enum Transcoded {
    /// Already in a universally supported format.
    Unchanged(EncodedImage),
    /// Converted to a universally supported format.
    Converted(EncodedImage),
    /// Conversion failed; the original bytes are kept.
    OriginalKept {
        image: EncodedImage,
        error: TranscodeError,
    },
}

impl Transcoded {
    pub fn into_image(self) -> EncodedImage {
        match self {
            Transcoded::Unchanged(image)
            | Transcoded::Converted(image)
            | Transcoded::OriginalKept { image, .. } => image,
        }
    }
}

/// Settings for [`transcode`].
#[derive(Debug, Clone, Copy)]
pub struct TranscodeOptions {
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
    /// Canvas (width, height) SVGs are scaled to fit.
    pub svg_canvas: (u32, u32),
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: crate::config::DEFAULT_JPEG_QUALITY,
            svg_canvas: crate::config::DEFAULT_SVG_CANVAS,
        }
    }
}

/// Normalize an image to a format strict readers accept.
///
/// Never fails: conversion errors come back as [`Transcoded::OriginalKept`].
pub fn transcode(image: EncodedImage, options: &TranscodeOptions) -> Transcoded {
    if image.kind.is_universal() {
        return Transcoded::Unchanged(image);
    }

    let converted = match image.kind {
        ImageKind::WebP => webp_to_jpeg(&image.data, options.jpeg_quality)
            .map(|data| EncodedImage::new(data, ImageKind::Jpeg)),
        ImageKind::Svg => rasterize_svg(&image.data, options.svg_canvas)
            .map(|data| EncodedImage::new(data, ImageKind::Png)),
        _ => raster_to_png(&image.data).map(|data| EncodedImage::new(data, ImageKind::Png)),
    };

    match converted {
        Ok(converted) => Transcoded::Converted(converted),
        Err(error) => Transcoded::OriginalKept { image, error },
    }
}

fn webp_to_jpeg(data: &[u8], quality: u8) -> Result<Vec<u8>, TranscodeError> {
    let decoded = image::load_from_memory_with_format(data, ImageFormat::WebP)
        .map_err(TranscodeError::Decode)?;
    encode_jpeg(&decoded, quality)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, TranscodeError> {
    let rgb = flatten_onto_white(image);
    let mut output = Vec::new();
    JpegEncoder::new_with_quality(&mut output, quality)
        .encode_image(&rgb)
        .map_err(TranscodeError::Encode)?;
    Ok(output)
}

/// JPEG has no alpha channel; composite transparent pixels over white.
fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = u32::from(a);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        rgb.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    rgb
}

fn raster_to_png(data: &[u8]) -> Result<Vec<u8>, TranscodeError> {
    let decoded = image::load_from_memory(data).map_err(TranscodeError::Decode)?;
    let mut output = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
        .map_err(TranscodeError::Encode)?;
    Ok(output)
}

/// Render an SVG centered on a white canvas, scaled to fit, and encode as PNG.
fn rasterize_svg(data: &[u8], (width, height): (u32, u32)) -> Result<Vec<u8>, TranscodeError> {
    let tree = usvg::Tree::from_data(data, &usvg::Options::default())
        .map_err(|e| TranscodeError::Rasterize(e.to_string()))?;

    let mut pixmap = tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| TranscodeError::Rasterize(format!("invalid canvas {width}x{height}")))?;
    pixmap.fill(tiny_skia::Color::WHITE);

    let size = tree.size();
    let scale = (width as f32 / size.width()).min(height as f32 / size.height());
    let dx = (width as f32 - size.width() * scale) / 2.0;
    let dy = (height as f32 - size.height() * scale) / 2.0;
    let transform = tiny_skia::Transform::from_row(scale, 0.0, 0.0, scale, dx, dy);

    resvg::render(&tree, transform, &mut pixmap.as_mut());

    pixmap
        .encode_png()
        .map_err(|e| TranscodeError::Rasterize(format!("PNG encoding: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn webp_bytes(width: u32, height: u32, pixel: Rgba<u8>) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, pixel));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::WebP)
            .unwrap();
        out
    }

    const SVG: &[u8] = br#"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="30"><rect width="40" height="30" fill="red"/></svg>"#;

    #[test]
    fn test_media_type_parsing() {
        assert_eq!(ImageKind::from_media_type("image/jpeg"), Some(ImageKind::Jpeg));
        assert_eq!(
            ImageKind::from_media_type("Image/WebP; charset=binary"),
            Some(ImageKind::WebP)
        );
        assert_eq!(ImageKind::from_media_type("image/svg+xml"), Some(ImageKind::Svg));
        assert_eq!(
            ImageKind::from_media_type("image/bmp"),
            Some(ImageKind::Other("image/bmp".to_string()))
        );
        assert_eq!(ImageKind::from_media_type("text/html"), None);
        assert_eq!(ImageKind::from_media_type("image/"), None);
    }

    #[test]
    fn test_extension_guess() {
        assert_eq!(ImageKind::from_extension("/a/photo.JPG"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_extension("/chart.svg"), Some(ImageKind::Svg));
        assert_eq!(ImageKind::from_extension("/image"), None);
    }

    #[test]
    fn test_sniff() {
        assert_eq!(ImageKind::sniff(&webp_bytes(2, 2, Rgba([0, 0, 0, 255]))), Some(ImageKind::WebP));
        assert_eq!(ImageKind::sniff(SVG), Some(ImageKind::Svg));
        assert_eq!(
            ImageKind::sniff(b"<?xml version=\"1.0\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\"/>"),
            Some(ImageKind::Svg)
        );
        assert_eq!(ImageKind::sniff(b"<html><body>nope</body></html>"), None);
    }

    #[test]
    fn test_universal_formats_pass_through() {
        let image = EncodedImage::new(b"GIF89a...".to_vec(), ImageKind::Gif);
        match transcode(image.clone(), &TranscodeOptions::default()) {
            Transcoded::Unchanged(out) => assert_eq!(out, image),
            other => panic!("expected passthrough, got {other:?}"),
        }
    }

    #[test]
    fn test_webp_becomes_jpeg() {
        let image = EncodedImage::new(webp_bytes(8, 6, Rgba([10, 200, 30, 255])), ImageKind::WebP);
        let out = transcode(image, &TranscodeOptions::default());
        assert!(matches!(out, Transcoded::Converted(_)));

        let out = out.into_image();
        assert_eq!(out.kind, ImageKind::Jpeg);
        assert_eq!(ImageKind::sniff(&out.data), Some(ImageKind::Jpeg));
        let decoded = image::load_from_memory(&out.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn test_transparent_webp_flattened_to_white() {
        let image = EncodedImage::new(webp_bytes(4, 4, Rgba([0, 0, 0, 0])), ImageKind::WebP);
        let out = transcode(image, &TranscodeOptions::default()).into_image();
        let decoded = image::load_from_memory(&out.data).unwrap().to_rgb8();
        let Rgb([r, g, b]) = *decoded.get_pixel(1, 1);
        assert!(r > 240 && g > 240 && b > 240, "expected white, got {r},{g},{b}");
    }

    #[test]
    fn test_broken_webp_keeps_original() {
        let bytes = b"RIFF\x10\x00\x00\x00WEBPgarbage".to_vec();
        let out = transcode(EncodedImage::new(bytes.clone(), ImageKind::WebP), &TranscodeOptions::default());
        match out {
            Transcoded::OriginalKept { image, error } => {
                assert_eq!(image.data, bytes);
                assert_eq!(image.kind, ImageKind::WebP);
                assert!(matches!(error, TranscodeError::Decode(_)));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn test_svg_rasterized_onto_canvas() {
        let out = transcode(EncodedImage::new(SVG.to_vec(), ImageKind::Svg), &TranscodeOptions::default());
        let out = out.into_image();
        assert_eq!(out.kind, ImageKind::Png);

        let decoded = image::load_from_memory_with_format(&out.data, ImageFormat::Png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1024, 768));
        // 40x30 scales exactly to fill 1024x768, so the center is red.
        let center = decoded.to_rgba8().get_pixel(512, 384).0;
        assert_eq!(center, [255, 0, 0, 255]);
    }

    #[test]
    fn test_invalid_svg_keeps_original() {
        let bytes = b"<svg this is not xml".to_vec();
        let out = transcode(EncodedImage::new(bytes.clone(), ImageKind::Svg), &TranscodeOptions::default());
        match out {
            Transcoded::OriginalKept { image, error } => {
                assert_eq!(image.kind, ImageKind::Svg);
                assert_eq!(image.data, bytes);
                assert!(matches!(error, TranscodeError::Rasterize(_)));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn test_bmp_becomes_png() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, Rgb([1, 2, 3])));
        let mut bmp = Vec::new();
        img.write_to(&mut Cursor::new(&mut bmp), ImageFormat::Bmp).unwrap();

        let kind = ImageKind::sniff(&bmp).unwrap();
        assert_eq!(kind, ImageKind::Other("image/bmp".to_string()));
        let out = transcode(EncodedImage::new(bmp, kind), &TranscodeOptions::default()).into_image();
        assert_eq!(out.kind, ImageKind::Png);
    }
}
