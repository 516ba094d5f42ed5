//! EPUB container assembly.
//!
//! The archive layout is fixed:
//!
//! ```text
//! mimetype                  (stored, always first)
//! META-INF/container.xml
//! OEBPS/content.opf
//! OEBPS/style.css
//! OEBPS/nav.xhtml
//! OEBPS/index.xhtml
//! OEBPS/images/image1.jpg   (one per embedded image)
//! ```

use std::io::{Cursor, Seek, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::PackageError;
use crate::images::ImageResource;

use super::document::{
    CONTAINER_PATH, CONTENT_DOCUMENT, Documents, NAV_DOCUMENT, OEBPS_DIR, PACKAGE_DOCUMENT,
    STYLESHEET,
};

pub const MIMETYPE_PATH: &str = "mimetype";
pub const MIMETYPE: &[u8] = b"application/epub+zip";

/// How an entry is stored in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Stored,
    Deflated,
}

/// One file in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    pub path: String,
    pub data: Vec<u8>,
    pub compression: Compression,
}

/// An ordered set of archive entries.
///
/// The `mimetype` entry is created by the package itself and always stays
/// first and stored; callers cannot add, move or replace it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpubPackage {
    entries: Vec<PackageEntry>,
}

impl Default for EpubPackage {
    fn default() -> Self {
        Self::new()
    }
}

impl EpubPackage {
    /// A package holding only the `mimetype` entry.
    pub fn new() -> Self {
        Self {
            entries: vec![PackageEntry {
                path: MIMETYPE_PATH.to_string(),
                data: MIMETYPE.to_vec(),
                compression: Compression::Stored,
            }],
        }
    }

    /// Lay out documents, then images, in the fixed archive order.
    pub fn assemble(documents: &Documents, images: &[ImageResource]) -> Self {
        let mut package = Self::new();
        let oebps = |name: &str| format!("{OEBPS_DIR}/{name}");

        package.add_entry(CONTAINER_PATH, documents.container.as_bytes().to_vec());
        package.add_entry(oebps(PACKAGE_DOCUMENT), documents.package.as_bytes().to_vec());
        package.add_entry(oebps(STYLESHEET), documents.stylesheet.as_bytes().to_vec());
        package.add_entry(oebps(NAV_DOCUMENT), documents.nav.as_bytes().to_vec());
        package.add_entry(oebps(CONTENT_DOCUMENT), documents.content.as_bytes().to_vec());

        for image in images {
            package.add_entry(oebps(&image.href()), image.data.clone());
        }

        package
    }

    /// Append a deflated entry. A `mimetype` path is ignored.
    pub fn add_entry(&mut self, path: impl Into<String>, data: Vec<u8>) {
        let path = path.into();
        if path == MIMETYPE_PATH {
            warn!("Ignoring caller-supplied mimetype entry");
            return;
        }
        self.entries.push(PackageEntry {
            path,
            data,
            compression: Compression::Deflated,
        });
    }

    pub fn entries(&self) -> &[PackageEntry] {
        &self.entries
    }

    pub fn entry(&self, path: &str) -> Option<&PackageEntry> {
        self.entries.iter().find(|entry| entry.path == path)
    }

    /// Write the archive to any [`Write`] + [`Seek`] destination and hand the
    /// destination back.
    pub fn write_to<W: Write + Seek>(
        &self,
        writer: W,
        compression_level: u32,
    ) -> Result<W, PackageError> {
        let mut zip = ZipWriter::new(writer);

        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(i64::from(compression_level.min(9))));

        for entry in &self.entries {
            let options = match entry.compression {
                Compression::Stored => stored,
                Compression::Deflated => deflated,
            };
            zip.start_file(entry.path.as_str(), options)?;
            zip.write_all(&entry.data)?;
            debug!("Wrote {} ({} bytes)", entry.path, entry.data.len());
        }

        Ok(zip.finish()?)
    }

    /// Write the archive into memory.
    pub fn to_bytes(&self, compression_level: u32) -> Result<Vec<u8>, PackageError> {
        let cursor = self.write_to(Cursor::new(Vec::new()), compression_level)?;
        Ok(cursor.into_inner())
    }

    /// Write the archive to `dir/file_name`.
    ///
    /// The archive is built in a temporary file in `dir` and only renamed
    /// into place once complete; on failure nothing is left behind.
    pub fn persist_in(
        &self,
        dir: &Path,
        file_name: &str,
        compression_level: u32,
    ) -> Result<PathBuf, PackageError> {
        let mut temp = NamedTempFile::new_in(dir)?;
        self.write_to(temp.as_file_mut(), compression_level)?;
        temp.as_file().sync_all()?;

        let path = dir.join(file_name);
        temp.persist_noclobber(&path)?;
        Ok(path)
    }
}
