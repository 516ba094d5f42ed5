use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::{Read, Seek};
use std::path::Path;
use zip::{CompressionMethod, ZipArchive};

use crate::error::PackageError;

use super::package::Compression;

/// An archive entry as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub size: u64,
    pub compressed_size: u64,
    pub compression: Compression,
}

/// A `<manifest>` item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
}

/// The parts of the package document worth showing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageInfo {
    pub identifier: String,
    pub title: String,
    pub creator: String,
    pub language: String,
    pub modified: Option<String>,
    pub manifest: Vec<ManifestItem>,
    /// Manifest ids in reading order.
    pub spine: Vec<String>,
}

impl PackageInfo {
    pub fn manifest_item(&self, href: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.href == href)
    }
}

/// Archive layout plus parsed package document.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub entries: Vec<EntryInfo>,
    pub package: PackageInfo,
}

/// Inspect an EPUB file on disk.
///
/// # Example
///
/// ```no_run
/// let inspection = folio::epub::inspect_epub("article.epub")?;
/// assert_eq!(inspection.entries[0].name, "mimetype");
/// println!("Title: {}", inspection.package.title);
/// # Ok::<(), folio::PackageError>(())
/// ```
pub fn inspect_epub<P: AsRef<Path>>(path: P) -> Result<Inspection, PackageError> {
    let file = std::fs::File::open(path)?;
    inspect_epub_from_reader(file)
}

/// Inspect an EPUB from any [`Read`] + [`Seek`] source.
pub fn inspect_epub_from_reader<R: Read + Seek>(reader: R) -> Result<Inspection, PackageError> {
    let mut archive = ZipArchive::new(reader)?;
    let entries = list_entries(&mut archive)?;

    let opf_path = find_opf_path(&mut archive)?;
    let opf = read_archive_file(&mut archive, &opf_path)?;
    let package = parse_opf(&opf)?;

    Ok(Inspection { entries, package })
}

fn list_entries<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<EntryInfo>, PackageError> {
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i)?;
        entries.push(EntryInfo {
            name: file.name().to_string(),
            size: file.size(),
            compressed_size: file.compressed_size(),
            compression: match file.compression() {
                CompressionMethod::Stored => Compression::Stored,
                _ => Compression::Deflated,
            },
        });
    }
    Ok(entries)
}

fn read_archive_file<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    path: &str,
) -> Result<String, PackageError> {
    let mut file = archive.by_name(path)?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Ok(content)
}

fn find_opf_path<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String, PackageError> {
    let container = read_archive_file(archive, "META-INF/container.xml")?;

    let mut reader = Reader::from_str(&container);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.name().as_ref() == b"rootfile" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"full-path" {
                        return Ok(String::from_utf8_lossy(&attr.value).into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(PackageError::Xml(e)),
            _ => {}
        }
    }

    Err(PackageError::Invalid(
        "No rootfile found in container.xml".into(),
    ))
}

fn parse_opf(content: &str) -> Result<PackageInfo, PackageError> {
    let mut reader = Reader::from_str(content);

    let mut info = PackageInfo::default();
    let mut in_metadata = false;
    let mut current_element: Option<String> = None;
    let mut buf_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                let local_name = local_name(name.as_ref());

                match local_name {
                    b"metadata" => in_metadata = true,
                    b"title" | b"creator" | b"language" | b"identifier" => {
                        if in_metadata {
                            current_element = Some(String::from_utf8_lossy(local_name).to_string());
                            buf_text.clear();
                        }
                    }
                    b"meta" if in_metadata => {
                        let modified = e.attributes().flatten().any(|attr| {
                            attr.key.as_ref() == b"property" && attr.value.as_ref() == b"dcterms:modified"
                        });
                        if modified {
                            current_element = Some("modified".to_string());
                            buf_text.clear();
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.name();

                match local_name(name.as_ref()) {
                    b"item" => {
                        let mut item = ManifestItem {
                            id: String::new(),
                            href: String::new(),
                            media_type: String::new(),
                            properties: None,
                        };

                        for attr in e.attributes().flatten() {
                            let value = String::from_utf8_lossy(&attr.value).into_owned();
                            match attr.key.as_ref() {
                                b"id" => item.id = value,
                                b"href" => item.href = value,
                                b"media-type" => item.media_type = value,
                                b"properties" => item.properties = Some(value),
                                _ => {}
                            }
                        }

                        if !item.id.is_empty() {
                            info.manifest.push(item);
                        }
                    }
                    b"itemref" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"idref" {
                                info.spine.push(String::from_utf8_lossy(&attr.value).into_owned());
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if current_element.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                // Entity references arrive separately from the surrounding text
                if current_element.is_some() {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    if let Some(c) = resolve_entity(&entity) {
                        buf_text.push(c);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                if local_name(name.as_ref()) == b"metadata" {
                    in_metadata = false;
                }

                if let Some(elem) = current_element.take() {
                    let text = buf_text.trim().to_string();
                    match elem.as_str() {
                        "title" => info.title = text,
                        "creator" => info.creator = text,
                        "language" => info.language = text,
                        "identifier" => {
                            if info.identifier.is_empty() {
                                info.identifier = text;
                            }
                        }
                        "modified" => info.modified = Some(text),
                        _ => {}
                    }
                    buf_text.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(PackageError::Xml(e)),
            _ => {}
        }
    }

    Ok(info)
}

fn resolve_entity(entity: &str) -> Option<char> {
    match entity {
        "apos" => Some('\''),
        "quot" => Some('"'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        _ => {
            let code = entity.strip_prefix('#')?;
            let code = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Strip a namespace prefix: `dc:title` -> `title`.
fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().position(|&b| b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}
