//! Error types for folio operations.

use thiserror::Error;

/// Errors that abort an export.
///
/// Per-image problems never show up here: the resolver absorbs them and
/// reports them as [`SkipReason`](crate::images::SkipReason) values instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("article has no body content")]
    EmptyBody,

    #[error("article has no identifier")]
    MissingIdentifier,

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("export failed: {0}")]
    Export(#[from] PackageError),
}

/// Failures while writing or inspecting the EPUB container.
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("could not move archive into place: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Invalid EPUB: {0}")]
    Invalid(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Export(PackageError::Io(e))
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Error::Export(PackageError::Zip(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
