//! Export configuration.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Per-request timeout for image fetches.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(12);
/// Largest image payload kept in memory.
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 8_000_000;
/// Number of image fetches in flight at once.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;
/// JPEG quality used when re-encoding WebP images.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;
/// Canvas that SVG images are rasterized onto.
pub const DEFAULT_SVG_CANVAS: (u32, u32) = (1024, 768);

/// Configuration for an export.
///
/// The fetch limits bound peak memory and total wall-clock time for articles
/// with many or very large images.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use folio::ExportConfig;
///
/// let config = ExportConfig::default()
///     .with_fetch_timeout(Duration::from_secs(5))
///     .with_fetch_concurrency(8);
/// assert_eq!(config.max_image_bytes, 8_000_000);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    #[serde(rename = "fetch_timeout_secs", deserialize_with = "duration_from_secs")]
    pub fetch_timeout: Duration,
    pub max_image_bytes: u64,
    /// 1 fetches images strictly one after another.
    pub fetch_concurrency: usize,
    pub jpeg_quality: u8,
    pub svg_canvas: (u32, u32),
    /// Deflate level (0-9) for every entry except `mimetype`.
    pub compression_level: u32,
    pub user_agent: String,
    pub language: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            svg_canvas: DEFAULT_SVG_CANVAS,
            compression_level: 6,
            user_agent: concat!("folio/", env!("CARGO_PKG_VERSION")).to_string(),
            language: "en".to_string(),
        }
    }
}

impl ExportConfig {
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_max_image_bytes(mut self, max: u64) -> Self {
        self.max_image_bytes = max;
        self
    }

    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn with_svg_canvas(mut self, width: u32, height: u32) -> Self {
        self.svg_canvas = (width, height);
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Concurrency clamped to at least one worker.
    pub(crate) fn workers(&self) -> usize {
        self.fetch_concurrency.max(1)
    }

    pub(crate) fn quality(&self) -> u8 {
        self.jpeg_quality.clamp(1, 100)
    }
}

fn duration_from_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}
