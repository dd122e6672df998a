use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::sync::Arc;

use crate::models::queue::{ErrorCode, ItemError, PhotoSource};

/// ISO-BMFF brands used by HEIC/HEIF photos.
const HEIF_BRANDS: &[&[u8; 4]] = &[
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1", b"heif",
];

/// Limits applied while preparing a photo for upload.
#[derive(Debug, Clone)]
pub struct PrepareConfig {
    /// Longest edge after downscaling, in pixels.
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub max_upload_bytes: usize,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1920,
            jpeg_quality: 85,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// External codec that turns HEIC/HEIF bytes into JPEG.
pub trait HeifTranscoder: Send + Sync {
    fn transcode_to_jpeg(&self, data: &[u8]) -> Result<Vec<u8>, String>;
}

/// A photo ready to be submitted.
#[derive(Debug, Clone)]
pub struct PreparedPhoto {
    pub file_name: String,
    pub content_type: &'static str,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Validates, downscales and re-encodes photos as JPEG.
#[derive(Clone, Default)]
pub struct ImagePreparer {
    config: PrepareConfig,
    heif: Option<Arc<dyn HeifTranscoder>>,
}

impl ImagePreparer {
    pub fn new(config: PrepareConfig) -> Self {
        Self { config, heif: None }
    }

    pub fn with_heif_transcoder(mut self, transcoder: Arc<dyn HeifTranscoder>) -> Self {
        self.heif = Some(transcoder);
        self
    }

    /// Read the photo and run the CPU-bound work on the blocking pool.
    pub async fn prepare(&self, source: &PhotoSource) -> Result<PreparedPhoto, PrepareError> {
        let data = match source {
            PhotoSource::Path(path) => tokio::fs::read(path).await?,
            PhotoSource::Bytes { data, .. } => data.clone(),
        };
        let file_name = source.file_name();
        let preparer = self.clone();

        tokio::task::spawn_blocking(move || preparer.prepare_bytes(&file_name, data))
            .await
            .map_err(|e| PrepareError::Worker(e.to_string()))?
    }

    pub fn prepare_bytes(
        &self,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<PreparedPhoto, PrepareError> {
        if data.is_empty() {
            return Err(PrepareError::Empty);
        }

        let data = if is_heif(&data) {
            let transcoder = self.heif.as_ref().ok_or(PrepareError::HeifUnavailable)?;
            tracing::debug!(file = file_name, "Transcoding HEIC/HEIF photo to JPEG");
            transcoder
                .transcode_to_jpeg(&data)
                .map_err(PrepareError::Transcode)?
        } else {
            data
        };

        let format = image::guess_format(&data)
            .map_err(|_| PrepareError::UnsupportedFormat("unrecognized".to_string()))?;
        if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP) {
            return Err(PrepareError::UnsupportedFormat(format!("{:?}", format)));
        }

        let image = image::load_from_memory_with_format(&data, format)?;
        let (width, height) = image.dimensions();
        let max = self.config.max_dimension;
        let fits = width <= max && height <= max;

        // Already a JPEG within limits: upload untouched.
        if format == ImageFormat::Jpeg && fits && data.len() <= self.config.max_upload_bytes {
            return Ok(PreparedPhoto {
                file_name: jpeg_file_name(file_name),
                content_type: "image/jpeg",
                data,
                width,
                height,
            });
        }

        let image = if fits {
            image
        } else {
            image.resize(max, max, FilterType::Lanczos3)
        };
        let (width, height) = image.dimensions();
        let encoded = encode_jpeg(&image, self.config.jpeg_quality)?;

        if encoded.len() > self.config.max_upload_bytes {
            return Err(PrepareError::TooLarge {
                size: encoded.len(),
                limit: self.config.max_upload_bytes,
            });
        }

        tracing::debug!(
            file = file_name,
            original_bytes = data.len(),
            compressed_bytes = encoded.len(),
            width,
            height,
            "Photo compressed"
        );

        Ok(PreparedPhoto {
            file_name: jpeg_file_name(file_name),
            content_type: "image/jpeg",
            data: encoded,
            width,
            height,
        })
    }
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, PrepareError> {
    let mut out = Vec::new();
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))?;
    Ok(out)
}

fn jpeg_file_name(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{}.jpg", stem),
        _ => format!("{}.jpg", file_name),
    }
}

/// Detect an ISO-BMFF container with a HEIF brand.
pub fn is_heif(data: &[u8]) -> bool {
    if data.len() < 12 || &data[4..8] != b"ftyp" {
        return false;
    }
    HEIF_BRANDS.iter().any(|brand| &data[8..12] == brand.as_slice())
}

#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("Failed to read photo: {0}")]
    Io(#[from] std::io::Error),

    #[error("Photo file is empty")]
    Empty,

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("HEIC/HEIF photos cannot be converted on this device")]
    HeifUnavailable,

    #[error("HEIC/HEIF conversion failed: {0}")]
    Transcode(String),

    #[error("Failed to decode or encode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Photo is too large after compression ({size} bytes, limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("Image worker failed: {0}")]
    Worker(String),
}

impl PrepareError {
    pub fn into_item_error(self) -> ItemError {
        let message = match &self {
            Self::TooLarge { limit, .. } => format!(
                "Photo is too large. Please choose a photo under {} MB.",
                limit / (1024 * 1024)
            ),
            Self::UnsupportedFormat(_) | Self::Image(_) | Self::Empty => {
                "This file is not a supported photo. Use JPEG, PNG, WebP or HEIC.".to_string()
            }
            _ => self.to_string(),
        };
        ItemError::new(ErrorCode::Validation, message)
    }
}
