//! Thumbnail generation for uploaded images.
//!
//! The source image is scaled to fit a fixed square with its aspect ratio
//! kept (Catmull-Rom resampling), centered on a transparent canvas of that
//! size, and encoded back in the format its name announces.
//!
//! Uses `spawn_blocking` for the CPU-bound work so the async runtime keeps
//! serving other objects of the batch.

use bytes::Bytes;
use image::{
    DynamicImage, GenericImageView, ImageOutputFormat, Rgba, RgbaImage,
    imageops::{self, FilterType},
};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

/// Edge length of the square thumbnail canvas, in pixels.
pub const THUMBNAIL_SIZE: u32 = 100;

const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Image formats the thumbnailer can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormatKind {
    Jpeg,
    Png,
}

/// Decide from the object name whether it is an image we thumbnail.
///
/// Suffix match is case-sensitive: `.jpg`, `.jpeg` and `.png` only.
pub fn classify(name: &str) -> Option<ImageFormatKind> {
    if name.ends_with(".jpg") || name.ends_with(".jpeg") {
        Some(ImageFormatKind::Jpeg)
    } else if name.ends_with(".png") {
        Some(ImageFormatKind::Png)
    } else {
        None
    }
}

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("unsupported image format for `{0}`, supports .jpg, .jpeg and .png")]
    UnsupportedFormat(String),
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode thumbnail: {0}")]
    Encode(#[source] image::ImageError),
    #[error("thumbnail task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone)]
pub struct Thumbnailer {
    size: u32,
    jpeg_quality: u8,
}

impl Default for Thumbnailer {
    fn default() -> Self {
        Self {
            size: THUMBNAIL_SIZE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl Thumbnailer {
    /// Produce the thumbnail for `name` from its raw bytes (blocking).
    pub fn generate(&self, name: &str, data: &[u8]) -> Result<Bytes, ThumbnailError> {
        let format =
            classify(name).ok_or_else(|| ThumbnailError::UnsupportedFormat(name.to_string()))?;

        let img = image::load_from_memory(data).map_err(ThumbnailError::Decode)?;
        let (orig_w, orig_h) = img.dimensions();

        let resized = img.resize(self.size, self.size, FilterType::CatmullRom);
        let (x, y) = self.offsets(resized.width(), resized.height());

        let mut canvas = RgbaImage::from_pixel(self.size, self.size, Rgba([0, 0, 0, 0]));
        imageops::overlay(&mut canvas, &resized.to_rgba8(), x, y);

        let data = self.encode(canvas, format)?;
        debug!(
            name,
            original_width = orig_w,
            original_height = orig_h,
            scaled_width = resized.width(),
            scaled_height = resized.height(),
            size = data.len(),
            "thumbnail generated"
        );
        Ok(data)
    }

    /// Run [`Thumbnailer::generate`] on the blocking pool.
    pub async fn generate_async(&self, name: &str, data: Bytes) -> Result<Bytes, ThumbnailError> {
        let thumbnailer = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || thumbnailer.generate(&name, &data))
            .await
            .map_err(|e| ThumbnailError::Task(e.to_string()))?
    }

    /// Top-left corner that centers a `width`×`height` image on the canvas.
    fn offsets(&self, width: u32, height: u32) -> (i64, i64) {
        (
            i64::from(self.size.saturating_sub(width) / 2),
            i64::from(self.size.saturating_sub(height) / 2),
        )
    }

    fn encode(&self, canvas: RgbaImage, format: ImageFormatKind) -> Result<Bytes, ThumbnailError> {
        let mut buf = Vec::new();
        let mut cursor = Cursor::new(&mut buf);

        match format {
            // JPEG has no alpha channel; the transparent padding becomes black.
            ImageFormatKind::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
                .write_to(&mut cursor, ImageOutputFormat::Jpeg(self.jpeg_quality)),
            ImageFormatKind::Png => {
                DynamicImage::ImageRgba8(canvas).write_to(&mut cursor, ImageOutputFormat::Png)
            }
        }
        .map_err(ThumbnailError::Encode)?;

        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;

    fn encoded(width: u32, height: u32, format: ImageOutputFormat) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 255]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), format)
            .unwrap();
        buf
    }

    #[test]
    fn classify_by_case_sensitive_suffix() {
        assert_eq!(classify("a/b/cat.jpg"), Some(ImageFormatKind::Jpeg));
        assert_eq!(classify("cat.jpeg"), Some(ImageFormatKind::Jpeg));
        assert_eq!(classify("cat.png"), Some(ImageFormatKind::Png));
        assert_eq!(classify("CAT.JPG"), None);
        assert_eq!(classify("report.pdf"), None);
        assert_eq!(classify("png"), None);
    }

    #[test]
    fn wide_png_is_centered_on_transparent_square() {
        let source = encoded(400, 200, ImageOutputFormat::Png);

        let out = Thumbnailer::default().generate("wide.png", &source).unwrap();

        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);
        let thumb = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(thumb.dimensions(), (100, 100));
        // 400x200 scales to 100x50, pasted at y = 25.
        assert_eq!(thumb.get_pixel(50, 5)[3], 0);
        assert_eq!(thumb.get_pixel(50, 95)[3], 0);
        assert_eq!(thumb.get_pixel(50, 50)[3], 255);
    }

    #[test]
    fn small_image_is_scaled_up_to_fit() {
        let source = encoded(10, 20, ImageOutputFormat::Png);

        let out = Thumbnailer::default().generate("tall.png", &source).unwrap();

        let thumb = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(thumb.dimensions(), (100, 100));
        // 10x20 scales to 50x100, pasted at x = 25.
        assert_eq!(thumb.get_pixel(5, 50)[3], 0);
        assert_eq!(thumb.get_pixel(50, 50)[3], 255);
    }

    #[test]
    fn jpeg_name_yields_jpeg_output() {
        let source = encoded(300, 300, ImageOutputFormat::Png);

        let out = Thumbnailer::default().generate("photo.jpeg", &source).unwrap();

        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
        let thumb = image::load_from_memory(&out).unwrap();
        assert_eq!(thumb.dimensions(), (100, 100));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = Thumbnailer::default()
            .generate("broken.png", b"definitely not an image")
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::Decode(_)));
    }

    #[test]
    fn non_image_name_is_unsupported() {
        let source = encoded(10, 10, ImageOutputFormat::Png);
        let err = Thumbnailer::default().generate("notes.gif", &source).unwrap_err();
        assert!(matches!(err, ThumbnailError::UnsupportedFormat(name) if name == "notes.gif"));
    }

    #[tokio::test]
    async fn async_generation_matches_blocking() {
        let source = encoded(120, 80, ImageOutputFormat::Png);
        let thumbnailer = Thumbnailer::default();

        let out = thumbnailer
            .generate_async("img.png", Bytes::from(source))
            .await
            .unwrap();

        assert_eq!(
            image::load_from_memory(&out).unwrap().dimensions(),
            (100, 100)
        );
    }
}
