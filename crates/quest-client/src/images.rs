use std::io::Cursor;
use std::path::Path;

use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::check_status;
use crate::config::{ImageLimits, ProviderConfig};
use crate::error::ClientError;
use crate::session::Session;

const JPEG_QUALITY: u8 = 80;

/// An image picked for the next message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageAttachment {
    /// Sniffs the format from the bytes; anything that isn't a supported
    /// image is rejected.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, ClientError> {
        let format = image::guess_format(&bytes)?;
        Ok(Self {
            file_name: file_name.into(),
            content_type: format.to_mime_type().to_string(),
            bytes,
        })
    }

    pub async fn from_path(path: &Path) -> Result<Self, ClientError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ClientError::Image(format!("cannot read {}: {}", path.display(), e)))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".into());
        Self::new(file_name, bytes)
    }

    pub fn extension(&self) -> &str {
        ImageFormat::from_mime_type(&self.content_type)
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("bin")
    }
}

/// Downscale and re-encode as JPEG when the image is over either limit;
/// otherwise return it untouched. CPU-bound, see [`compress_blocking`].
pub fn compress(attachment: ImageAttachment, limits: &ImageLimits) -> Result<ImageAttachment, ClientError> {
    let (width, height) = ImageReader::new(Cursor::new(&attachment.bytes))
        .with_guessed_format()
        .map_err(|e| ClientError::Image(e.to_string()))?
        .into_dimensions()?;

    let fits = width.max(height) <= limits.max_dimension;
    if fits && attachment.bytes.len() <= limits.max_bytes {
        return Ok(attachment);
    }

    let mut img = image::load_from_memory(&attachment.bytes)?;
    if !fits {
        img = img.resize(limits.max_dimension, limits.max_dimension, FilterType::Lanczos3);
    }

    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))?;

    debug!(
        "Compressed {} from {}x{} ({} bytes) to {}x{} ({} bytes)",
        attachment.file_name,
        width,
        height,
        attachment.bytes.len(),
        img.width(),
        img.height(),
        out.len()
    );

    let stem = Path::new(&attachment.file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".into());

    Ok(ImageAttachment {
        file_name: format!("{}.jpg", stem),
        content_type: "image/jpeg".into(),
        bytes: out,
    })
}

/// [`compress`] off the async runtime.
pub async fn compress_blocking(
    attachment: ImageAttachment,
    limits: ImageLimits,
) -> Result<ImageAttachment, ClientError> {
    tokio::task::spawn_blocking(move || compress(attachment, &limits))
        .await
        .map_err(|e| ClientError::Image(format!("compression task failed: {}", e)))?
}

/// Uploads attachments to the provider's object storage and hands back a
/// public URL the backend (and the model) can fetch.
#[derive(Clone)]
pub struct ImageStore {
    http: Client,
    provider: ProviderConfig,
}

impl ImageStore {
    pub fn new(http: Client, provider: ProviderConfig) -> Self {
        Self { http, provider }
    }

    pub async fn upload(&self, session: &Session, image: &ImageAttachment) -> Result<String, ClientError> {
        let path = object_path(session.user_id, image);
        let bucket = &self.provider.image_bucket;

        let url = self
            .provider
            .storage_endpoint(&format!("object/{}/{}", bucket, path))?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(&session.access_token)
            .header("apikey", &self.provider.anon_key)
            .header(CONTENT_TYPE, &image.content_type)
            .body(image.bytes.clone())
            .send()
            .await?;
        check_status(resp).await?;

        let public = self
            .provider
            .storage_endpoint(&format!("object/public/{}/{}", bucket, path))?;
        info!("Uploaded {} ({} bytes) to {}", image.file_name, image.bytes.len(), path);
        Ok(public.to_string())
    }
}

/// `<user>/<unix-ms>_<random>.<ext>` keeps uploads per-user and collision free.
fn object_path(user_id: Uuid, image: &ImageAttachment) -> String {
    format!(
        "{}/{}_{}.{}",
        user_id,
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        image.extension()
    )
}
