//! # folio
//!
//! Turns extracted web articles into self-contained EPUB 3 files for offline
//! reading.
//!
//! ## Features
//!
//! - Downloads article images with bounded parallelism, size and time limits
//! - Transcodes WebP to JPEG and rasterizes SVG so every reader can show them
//! - Cleans article HTML into well-formed XHTML
//! - Writes a conformant EPUB 3 archive with `mimetype` stored first
//!
//! ## Quick Start
//!
//! ```no_run
//! use folio::{ArticleInput, EpubExporter, ExportConfig};
//!
//! # async fn run() -> folio::Result<()> {
//! let article = ArticleInput::new(
//!     "a1",
//!     "Test & Trial",
//!     r#"<p>Hello&nbsp;World</p><img src="/a.webp">"#,
//!     "https://example.com/post",
//! )
//! .with_byline("Jane Doe");
//!
//! // One-off export with default settings
//! let bytes = folio::export(&article).await?;
//!
//! // Or keep an exporter around and write into a directory
//! let exporter = EpubExporter::with_config(ExportConfig::default().with_fetch_concurrency(8))?;
//! let path = exporter.export_to_dir(&article, std::path::Path::new("/tmp")).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure model
//!
//! Only an unusable article (no body, no identifier) or an I/O failure while
//! writing the archive fails an export. Images that cannot be fetched or
//! decoded are skipped and their `src` left as it was.

pub mod article;
pub mod config;
pub mod epub;
pub mod error;
pub mod export;
pub mod images;
pub(crate) mod patterns;
pub mod sanitize;

pub use article::ArticleInput;
pub use config::ExportConfig;
pub use epub::{EpubPackage, inspect_epub};
pub use error::{Error, PackageError, Result};
pub use export::{EpubExporter, PreparedEpub, export};
pub use images::{ImageResource, SkipReason, SkippedImage};
