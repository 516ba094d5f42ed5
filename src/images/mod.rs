//! Image resolution: find the `<img>` references in an article body, download
//! them, normalize their format and point `src` at the packaged copy.
//!
//! Every per-image problem is soft. A reference that cannot be fetched keeps
//! its original remote URL, a failed conversion keeps the original bytes, and
//! [`ImageResolver::resolve`] always returns whatever subset it managed.

mod fetch;
mod transcode;

use std::ops::Range;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::ExportConfig;
use crate::error::Result;
use crate::patterns::IMG_SRC_RE;
use crate::sanitize::strip_image_attributes;

pub use fetch::{Fetched, HttpFetcher};
pub use transcode::{
    EncodedImage, ImageKind, TranscodeError, TranscodeOptions, Transcoded, transcode,
};

/// Directory, relative to the content document, that images are packaged in.
pub const IMAGE_DIR: &str = "images";

/// An image embedded in the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResource {
    /// `image<N>.<ext>`, unique within one export.
    pub filename: String,
    pub data: Vec<u8>,
    pub media_type: String,
}

impl ImageResource {
    /// Path relative to the content document, as written into `src`.
    pub fn href(&self) -> String {
        format!("{IMAGE_DIR}/{}", self.filename)
    }
}

/// Why an image reference was left pointing at its original URL.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    #[error("relative reference with no base URL")]
    Unresolvable,

    #[error("unsupported URL scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("not an image ({0})")]
    NotAnImage(String),

    #[error("larger than {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("transcoding aborted: {0}")]
    Transcode(String),
}

impl From<reqwest::Error> for SkipReason {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SkipReason::Timeout
        } else if let Some(status) = e.status() {
            SkipReason::Status(status.as_u16())
        } else {
            SkipReason::Network(e.to_string())
        }
    }
}

/// A reference that stayed remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedImage {
    pub src: String,
    pub reason: SkipReason,
}

/// Output of [`ImageResolver::resolve`].
#[derive(Debug, Clone, Default)]
pub struct ResolvedImages {
    /// Body with packaged images pointing at `images/<filename>`.
    pub html: String,
    /// Embedded images, in document order of first occurrence.
    pub images: Vec<ImageResource>,
    pub skipped: Vec<SkippedImage>,
}

/// An `<img src>` occurrence and the byte range of its value.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ImageRef {
    src: String,
    range: Range<usize>,
}

/// What to do with one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reference {
    /// Already packaged or inline; leave untouched.
    Local,
    Remote(Url),
    Skip(SkipReason),
}

/// Per-reference result, before filenames are assigned.
enum Outcome {
    Local,
    Embedded(EncodedImage),
    Skipped(SkipReason),
}

/// Resolves and embeds article images.
///
/// Fetches run on a bounded pool of `fetch_concurrency` workers; results are
/// collected in document order, so filenames do not depend on which download
/// finishes first. The same URL appearing twice is fetched twice and packaged
/// under two filenames.
#[derive(Debug, Clone)]
pub struct ImageResolver {
    fetcher: HttpFetcher,
    config: ExportConfig,
}

impl ImageResolver {
    pub fn new(config: ExportConfig) -> Result<Self> {
        Ok(Self {
            fetcher: HttpFetcher::new(&config)?,
            config,
        })
    }

    /// Embed every resolvable image in `html`.
    ///
    /// `base_url` is used for relative references; without it they are
    /// skipped.
    pub async fn resolve(&self, html: &str, base_url: Option<&Url>) -> ResolvedImages {
        let refs = find_image_refs(html);

        let outcomes: Vec<Outcome> = stream::iter(&refs)
            .map(|image_ref| self.process(image_ref, base_url))
            .buffered(self.config.workers())
            .collect()
            .await;

        let mut rewritten = String::with_capacity(html.len());
        let mut images = Vec::new();
        let mut skipped = Vec::new();
        let mut last = 0;

        for (image_ref, outcome) in refs.into_iter().zip(outcomes) {
            match outcome {
                Outcome::Local => {}
                Outcome::Skipped(reason) => {
                    warn!("Skipping image {}: {}", image_ref.src, reason);
                    skipped.push(SkippedImage {
                        src: image_ref.src,
                        reason,
                    });
                }
                Outcome::Embedded(image) => {
                    let resource = ImageResource {
                        filename: format!("image{}.{}", images.len() + 1, image.kind.extension()),
                        media_type: image.kind.media_type().to_string(),
                        data: image.data,
                    };
                    debug!(
                        "Embedded {} as {} ({}, {} bytes)",
                        image_ref.src,
                        resource.filename,
                        resource.media_type,
                        resource.data.len()
                    );

                    rewritten.push_str(&html[last..image_ref.range.start]);
                    rewritten.push_str(&resource.href());
                    last = image_ref.range.end;
                    images.push(resource);
                }
            }
        }
        rewritten.push_str(&html[last..]);

        ResolvedImages {
            html: strip_image_attributes(&rewritten),
            images,
            skipped,
        }
    }

    async fn process(&self, image_ref: &ImageRef, base_url: Option<&Url>) -> Outcome {
        let url = match classify(&image_ref.src, base_url) {
            Reference::Local => return Outcome::Local,
            Reference::Skip(reason) => return Outcome::Skipped(reason),
            Reference::Remote(url) => url,
        };

        let fetched = match self.fetcher.fetch(&url).await {
            Ok(fetched) => fetched,
            Err(reason) => return Outcome::Skipped(reason),
        };

        let Some(kind) = detect_kind(&fetched, &url) else {
            return Outcome::Skipped(SkipReason::NotAnImage("unrecognized format".to_string()));
        };

        let options = TranscodeOptions {
            jpeg_quality: self.config.quality(),
            svg_canvas: self.config.svg_canvas,
        };
        let image = EncodedImage::new(fetched.data, kind);

        // Decoding and encoding are CPU-bound; keep them off the async workers.
        let transcoded = tokio::task::spawn_blocking(move || transcode(image, &options)).await;
        match transcoded {
            Ok(Transcoded::OriginalKept { image, error }) => {
                warn!("Keeping {} as {}: {}", url, image.kind.media_type(), error);
                Outcome::Embedded(image)
            }
            Ok(transcoded) => Outcome::Embedded(transcoded.into_image()),
            Err(e) => Outcome::Skipped(SkipReason::Transcode(e.to_string())),
        }
    }
}

/// Convenience wrapper building a one-off [`ImageResolver`].
pub async fn resolve_images(
    html: &str,
    base_url: Option<&Url>,
    config: &ExportConfig,
) -> Result<ResolvedImages> {
    let resolver = ImageResolver::new(config.clone())?;
    Ok(resolver.resolve(html, base_url).await)
}

/// Scan for `<img src>` values in document order.
fn find_image_refs(html: &str) -> Vec<ImageRef> {
    IMG_SRC_RE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|value| ImageRef {
            src: value.as_str().to_string(),
            range: value.range(),
        })
        .collect()
}

fn classify(src: &str, base_url: Option<&Url>) -> Reference {
    let src = src.trim().replace("&amp;", "&");
    if src.is_empty() {
        return Reference::Skip(SkipReason::Unresolvable);
    }
    if src.starts_with("images/")
        || src
            .get(..5)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
    {
        return Reference::Local;
    }

    let url = match Url::parse(&src) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => match base_url.map(|base| base.join(&src)) {
            Some(Ok(url)) => url,
            _ => return Reference::Skip(SkipReason::Unresolvable),
        },
        Err(_) => return Reference::Skip(SkipReason::Unresolvable),
    };

    match url.scheme() {
        "http" | "https" => Reference::Remote(url),
        scheme => Reference::Skip(SkipReason::UnsupportedScheme(scheme.to_string())),
    }
}

/// Bytes first, then the declared type, then the URL's extension.
fn detect_kind(fetched: &Fetched, url: &Url) -> Option<ImageKind> {
    ImageKind::sniff(&fetched.data)
        .or_else(|| {
            fetched
                .content_type
                .as_deref()
                .and_then(ImageKind::from_media_type)
        })
        .or_else(|| ImageKind::from_extension(url.path()))
}
