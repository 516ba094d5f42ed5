//! EPUB 3 documents, archive packaging and inspection.

mod document;
mod package;
mod reader;

pub use document::{
    CONTAINER_PATH, CONTENT_DOCUMENT, Documents, NAV_DOCUMENT, OEBPS_DIR, PACKAGE_DOCUMENT,
    STYLESHEET, build_documents, escape_xml,
};
pub use package::{Compression, EpubPackage, MIMETYPE, MIMETYPE_PATH, PackageEntry};
pub use reader::{
    EntryInfo, Inspection, ManifestItem, PackageInfo, inspect_epub, inspect_epub_from_reader,
};
