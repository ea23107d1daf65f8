//! Screen-capture contract and the frame type handed to providers.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat};

use crate::error::CaptureError;

/// One captured screen image.
#[derive(Debug, Clone)]
pub struct Frame {
    image: DynamicImage,
    captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }

    pub fn from_png(png_bytes: &[u8]) -> Result<Self, CaptureError> {
        let image = image::load_from_memory_with_format(png_bytes, ImageFormat::Png)?;
        Ok(Self::new(image))
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    /// PNG encoding, the format vision APIs accept inline.
    pub fn encode_png(&self) -> Result<Vec<u8>, CaptureError> {
        let mut buffer = Cursor::new(Vec::new());
        self.image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }
}

#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Grabs the current screen. Implementations backed by blocking OS calls
    /// must not block the runtime; see [`BlockingCapture`].
    async fn capture(&self) -> Result<Frame, CaptureError>;

    fn backend_name(&self) -> &str {
        "unknown"
    }
}

/// Adapts a synchronous screenshot function into a [`ScreenCapture`] by
/// running it on the blocking thread pool.
pub struct BlockingCapture<F> {
    name: String,
    grab: Arc<F>,
}

impl<F> BlockingCapture<F>
where
    F: Fn() -> Result<DynamicImage, CaptureError> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, grab: F) -> Self {
        Self {
            name: name.into(),
            grab: Arc::new(grab),
        }
    }
}

#[async_trait]
impl<F> ScreenCapture for BlockingCapture<F>
where
    F: Fn() -> Result<DynamicImage, CaptureError> + Send + Sync + 'static,
{
    async fn capture(&self) -> Result<Frame, CaptureError> {
        let grab = Arc::clone(&self.grab);
        let image = tokio::task::spawn_blocking(move || grab())
            .await
            .map_err(|err| CaptureError::Backend(format!("capture worker join failed: {err}")))??;

        log::debug!(
            "Captured {}x{} frame via {}",
            image.width(),
            image.height(),
            self.name
        );
        Ok(Frame::new(image))
    }

    fn backend_name(&self) -> &str {
        &self.name
    }
}
