//! Article-to-EPUB export pipeline.
//!
//! ```text
//! validate -> resolve images -> sanitize -> build documents -> package
//! ```
//!
//! Image resolution runs on the raw body so that `<picture>` sources are
//! still present when `src` values are collected; the sanitizer then strips
//! the wrappers around the rewritten references.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::article::ArticleInput;
use crate::config::ExportConfig;
use crate::epub::{EpubPackage, build_documents};
use crate::error::Result;
use crate::images::{ImageResolver, ImageResource, SkippedImage};
use crate::sanitize::sanitize;

const MAX_SLUG_LEN: usize = 60;
const FALLBACK_STEM: &str = "article";

/// An assembled package, plus what happened to each image on the way.
#[derive(Debug, Clone)]
pub struct PreparedEpub {
    pub package: EpubPackage,
    pub images: Vec<ImageResource>,
    pub skipped: Vec<SkippedImage>,
}

/// Exports articles as EPUB 3 files.
///
/// Holds one HTTP client, so reuse an exporter across articles rather than
/// building one per export. Dropping an in-flight export future cancels its
/// outstanding image fetches; nothing is written until the archive is
/// complete.
///
/// # Example
///
/// ```no_run
/// use folio::{ArticleInput, EpubExporter};
///
/// # async fn run() -> folio::Result<()> {
/// let article = ArticleInput::new(
///     "a1",
///     "Test & Trial",
///     "<p>Hello&nbsp;World</p>",
///     "https://example.com/post",
/// );
/// let exporter = EpubExporter::new()?;
/// let bytes = exporter.export(&article).await?;
/// assert_eq!(&bytes[30..38], b"mimetype");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EpubExporter {
    config: ExportConfig,
    resolver: ImageResolver,
}

impl EpubExporter {
    pub fn new() -> Result<Self> {
        Self::with_config(ExportConfig::default())
    }

    pub fn with_config(config: ExportConfig) -> Result<Self> {
        Ok(Self {
            resolver: ImageResolver::new(config.clone())?,
            config,
        })
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Run the pipeline up to an in-memory package.
    ///
    /// Fails only on an invalid article; unusable images are skipped and
    /// reported in [`PreparedEpub::skipped`].
    pub async fn package(&self, article: &ArticleInput) -> Result<PreparedEpub> {
        article.validate()?;

        let base_url = match Url::parse(article.source_url.trim()) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(
                    "Source URL {:?} is not usable as a base: {}",
                    article.source_url, e
                );
                None
            }
        };

        let resolved = self
            .resolver
            .resolve(&article.body_html, base_url.as_ref())
            .await;
        let body = sanitize(&resolved.html);
        debug!("Sanitized body: {} bytes", body.len());

        let documents = build_documents(article, &body, &resolved.images, &self.config.language);
        let package = EpubPackage::assemble(&documents, &resolved.images);

        info!(
            "Packaged article {} ({} images embedded, {} skipped)",
            article.id,
            resolved.images.len(),
            resolved.skipped.len()
        );

        Ok(PreparedEpub {
            package,
            images: resolved.images,
            skipped: resolved.skipped,
        })
    }

    /// Export an article as EPUB bytes.
    pub async fn export(&self, article: &ArticleInput) -> Result<Vec<u8>> {
        let prepared = self.package(article).await?;
        let bytes = prepared.package.to_bytes(self.config.compression_level)?;
        debug!("Archive is {} bytes", bytes.len());
        Ok(bytes)
    }

    /// Export an article into `dir` as `<slug>-<uuid>.epub`.
    ///
    /// The file only becomes visible once it has been completely written.
    pub async fn export_to_dir(&self, article: &ArticleInput, dir: &Path) -> Result<PathBuf> {
        let prepared = self.package(article).await?;
        let file_name = output_file_name(&article.title);
        let path = prepared
            .package
            .persist_in(dir, &file_name, self.config.compression_level)?;
        info!("Wrote {}", path.display());
        Ok(path)
    }
}

/// Export an article with the default configuration.
pub async fn export(article: &ArticleInput) -> Result<Vec<u8>> {
    EpubExporter::new()?.export(article).await
}

fn output_file_name(title: &str) -> String {
    let slug = slug::slugify(title);
    let mut stem = slug.as_str();
    if stem.len() > MAX_SLUG_LEN {
        stem = stem[..MAX_SLUG_LEN].trim_end_matches('-');
    }
    if stem.is_empty() {
        stem = FALLBACK_STEM;
    }
    format!("{}-{}.epub", stem, Uuid::new_v4())
}
