//! Upload preprocessing: decode once, re-encode a thumbnail and a render
//! image as JPEG.

use std::io::Cursor;

use afterglow_core::config::ImageConfig;
use afterglow_core::types::{Blob, Dimensions};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use tracing::debug;

use crate::error::{AppError, Result};

/// MIME type of every prepared blob.
pub const JPEG_MIME: &str = "image/jpeg";

/// Both resolutions of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    /// Small image used while browsing.
    pub thumb: Blob,
    /// Full image used for the selected memory.
    pub render: Blob,
    /// Size of `render`.
    pub dimensions: Dimensions,
}

/// Turns raw upload bytes into a [`PreparedImage`].
#[async_trait]
pub trait ImagePreprocessor: Send + Sync {
    /// Prepare an upload.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::PreprocessingFailed`] for anything that cannot be
    /// decoded or encoded.
    async fn prepare(&self, bytes: &[u8], mime: &str) -> Result<PreparedImage>;
}

/// Default preprocessor backed by the `image` crate.
#[derive(Debug, Clone, Default)]
pub struct ImageCrateProcessor {
    config: ImageConfig,
}

impl ImageCrateProcessor {
    /// Create a processor with the given size and quality limits.
    #[must_use]
    pub fn new(config: ImageConfig) -> Self {
        Self { config }
    }
}

/// Scale so the longest edge is at most `max_edge`. Never upscales.
fn fit(image: &DynamicImage, max_edge: u32) -> DynamicImage {
    if image.width().max(image.height()) <= max_edge {
        image.clone()
    } else {
        image.resize(max_edge, max_edge, FilterType::Triangle)
    }
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .to_rgb8()
        .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, quality))
        .map_err(|e| AppError::PreprocessingFailed(e.to_string()))?;
    Ok(bytes)
}

fn prepare_blocking(bytes: &[u8], config: &ImageConfig) -> Result<PreparedImage> {
    let decoded = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| AppError::PreprocessingFailed(e.to_string()))?
        .decode()
        .map_err(|e| AppError::PreprocessingFailed(e.to_string()))?;

    let thumb = fit(&decoded, config.thumb_max_edge);
    let render = fit(&decoded, config.render_max_edge);
    let dimensions = Dimensions::new(render.width(), render.height());

    Ok(PreparedImage {
        thumb: Blob::new(JPEG_MIME, encode_jpeg(&thumb, config.thumb_quality)?),
        render: Blob::new(JPEG_MIME, encode_jpeg(&render, config.render_quality)?),
        dimensions,
    })
}

#[async_trait]
impl ImagePreprocessor for ImageCrateProcessor {
    async fn prepare(&self, bytes: &[u8], mime: &str) -> Result<PreparedImage> {
        let owned = bytes.to_vec();
        let config = self.config.clone();
        let prepared = tokio::task::spawn_blocking(move || prepare_blocking(&owned, &config))
            .await
            .map_err(|e| AppError::PreprocessingFailed(e.to_string()))??;
        debug!(
            mime,
            input_bytes = bytes.len(),
            width = prepared.dimensions.width,
            height = prepared.dimensions.height,
            "Upload prepared"
        );
        Ok(prepared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    fn decoded_size(blob: &Blob) -> (u32, u32) {
        let img = image::load_from_memory(&blob.bytes).expect("decode jpeg");
        (img.width(), img.height())
    }

    #[tokio::test]
    async fn large_upload_is_downscaled() {
        let processor = ImageCrateProcessor::default();
        let prepared = processor.prepare(&png(2000, 1000), "image/png").await.expect("prepare");

        assert_eq!(prepared.thumb.mime, JPEG_MIME);
        assert_eq!(decoded_size(&prepared.thumb), (512, 256));
        assert_eq!(decoded_size(&prepared.render), (1536, 768));
        assert_eq!(prepared.dimensions, Dimensions::new(1536, 768));
    }

    #[tokio::test]
    async fn small_upload_is_not_upscaled() {
        let processor = ImageCrateProcessor::default();
        let prepared = processor.prepare(&png(300, 400), "image/png").await.expect("prepare");
        assert_eq!(decoded_size(&prepared.thumb), (300, 400));
        assert_eq!(prepared.dimensions, Dimensions::new(300, 400));
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let processor = ImageCrateProcessor::default();
        let err = processor
            .prepare(b"definitely not an image", "image/jpeg")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PreprocessingFailed(_)));
    }
}
