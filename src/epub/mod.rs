//! EPUB writer. Consumes a [Book] and writes EPUB 3 or EPUB 2 (mimetype, container, OPF,
//! nav/NCX, chapters, resources).

use crate::model::Book;
use std::collections::HashSet;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";
const PACKAGE_DOC: &str = "content.opf";
const XHTML: &str = "application/xhtml+xml";

/// EPUB format version.
///
/// Default is EPUB 3 (OPF 3.0, nav.xhtml). Use `Epub2` for legacy readers (OPF 2.0, NCX,
/// XHTML 1.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EpubVersion {
    #[default]
    Epub3,
    Epub2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpubOptions {
    pub version: EpubVersion,
    /// Also write toc.ncx in EPUB 3 output. EPUB 2 always has one.
    pub include_ncx: bool,
}

impl EpubOptions {
    fn has_ncx(&self) -> bool {
        self.version == EpubVersion::Epub2 || self.include_ncx
    }
}

/// Errors from packaging a book. Maps to CLI exit code 3.
#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("Cannot write EPUB: book title is empty.")]
    EmptyTitle,

    #[error("Cannot write EPUB: book author is empty.")]
    EmptyAuthor,

    #[error("Cannot write EPUB: book language is empty.")]
    EmptyLanguage,

    #[error("Cannot write EPUB: book has no chapters.")]
    NoChapters,

    #[error("Cannot write EPUB: manifest id '{id}' is used more than once.")]
    DuplicateId { id: String },

    #[error("Cannot write EPUB: path '{path}' is used more than once.")]
    DuplicatePath { path: String },

    #[error("Cannot write EPUB: '{path}' is not a valid container-relative path.")]
    InvalidPath { path: String },

    #[error("Cannot write EPUB: spine references unknown chapter '{id}'.")]
    UnknownSpineEntry { id: String },

    #[error("Cannot write EPUB: table of contents references unknown chapter '{id}'.")]
    UnknownTocEntry { id: String },

    #[error("Failed to create EPUB file in {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move EPUB into place at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error while writing EPUB: {0}")]
    Io(#[from] std::io::Error),
}

/// One manifest entry. `href` is relative to the package document.
#[derive(Debug)]
struct ManifestItem<'a> {
    id: &'a str,
    href: &'a str,
    media_type: &'a str,
    properties: Option<&'static str>,
    body: PartBody<'a>,
}

#[derive(Debug)]
enum PartBody<'a> {
    Nav,
    Ncx,
    Chapter(usize),
    Resource(&'a [u8]),
}

/// Write `book` to `path`.
///
/// The archive is built in a temporary file next to `path` and moved over it only once
/// complete; on error nothing is left behind.
pub fn write_epub(book: &Book, path: &Path, options: &EpubOptions) -> Result<(), PackagingError> {
    manifest(book, options)?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".instakindle-")
        .suffix(".epub.part")
        .tempfile_in(&dir)
        .map_err(|e| PackagingError::CreateFile {
            path: dir.clone(),
            source: e,
        })?;
    build_epub(book, tmp.as_file_mut(), options)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| PackagingError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    log::info!("wrote {}", path.display());
    Ok(())
}

/// Build the archive into `writer` and hand the writer back.
pub fn build_epub<W: Write + Seek>(
    book: &Book,
    writer: W,
    options: &EpubOptions,
) -> Result<W, PackagingError> {
    let items = manifest(book, options)?;
    let mut zip = ZipWriter::new(writer);

    let options_stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    let options_deflate = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    // 1. Mimetype first, uncompressed (required by OCF)
    zip.start_file("mimetype", options_stored)?;
    zip.write_all(MIMETYPE)?;

    // 2. Container
    zip.start_file("META-INF/container.xml", options_deflate)?;
    zip.write_all(CONTAINER_XML)?;

    // 3. Package document
    zip.start_file(format!("{}{}", OEBPS_PREFIX, PACKAGE_DOC), options_deflate)?;
    zip.write_all(package_document(book, &items, options).as_bytes())?;

    // 4. Every manifest item at its declared path
    for item in &items {
        zip.start_file(format!("{}{}", OEBPS_PREFIX, item.href), options_deflate)?;
        match item.body {
            PartBody::Nav => zip.write_all(nav_xhtml(book).as_bytes())?,
            PartBody::Ncx => zip.write_all(ncx(book).as_bytes())?,
            PartBody::Chapter(i) => {
                zip.write_all(chapter_xhtml(book, i, options.version).as_bytes())?
            }
            PartBody::Resource(data) => zip.write_all(data)?,
        }
    }

    Ok(zip.finish()?)
}

/// Compute and validate the manifest: navigation, chapters, then resources.
fn manifest<'a>(
    book: &'a Book,
    options: &EpubOptions,
) -> Result<Vec<ManifestItem<'a>>, PackagingError> {
    validate_book(book)?;

    let mut items = Vec::with_capacity(book.chapters.len() + book.resources.len() + 2);
    if options.version == EpubVersion::Epub3 {
        items.push(ManifestItem {
            id: "nav",
            href: "nav.xhtml",
            media_type: XHTML,
            properties: Some("nav"),
            body: PartBody::Nav,
        });
    }
    if options.has_ncx() {
        items.push(ManifestItem {
            id: "ncx",
            href: "toc.ncx",
            media_type: "application/x-dtbncx+xml",
            properties: None,
            body: PartBody::Ncx,
        });
    }
    for (i, ch) in book.chapters.iter().enumerate() {
        items.push(ManifestItem {
            id: &ch.id,
            href: &ch.path,
            media_type: XHTML,
            properties: None,
            body: PartBody::Chapter(i),
        });
    }
    for part in &book.resources {
        items.push(ManifestItem {
            id: &part.id,
            href: &part.path,
            media_type: &part.media_type,
            properties: None,
            body: PartBody::Resource(&part.data),
        });
    }

    let mut ids = HashSet::new();
    let mut paths = HashSet::from([PACKAGE_DOC.to_string()]);
    for item in &items {
        if !is_valid_id(item.id) || !ids.insert(item.id) {
            return Err(PackagingError::DuplicateId {
                id: item.id.to_string(),
            });
        }
        if !is_relative_path(item.href) {
            return Err(PackagingError::InvalidPath {
                path: item.href.to_string(),
            });
        }
        if !paths.insert(item.href.to_ascii_lowercase()) {
            return Err(PackagingError::DuplicatePath {
                path: item.href.to_string(),
            });
        }
    }

    let chapter_ids: HashSet<&str> = book.chapters.iter().map(|c| c.id.as_str()).collect();
    if let Some(id) = book.spine.iter().find(|id| !chapter_ids.contains(id.as_str())) {
        return Err(PackagingError::UnknownSpineEntry { id: id.clone() });
    }
    if let Some(entry) = book
        .toc
        .iter()
        .find(|t| !chapter_ids.contains(t.chapter_id.as_str()))
    {
        return Err(PackagingError::UnknownTocEntry {
            id: entry.chapter_id.clone(),
        });
    }
    Ok(items)
}

fn validate_book(book: &Book) -> Result<(), PackagingError> {
    if book.title.trim().is_empty() {
        return Err(PackagingError::EmptyTitle);
    }
    if book.author.trim().is_empty() {
        return Err(PackagingError::EmptyAuthor);
    }
    if book.language.trim().is_empty() {
        return Err(PackagingError::EmptyLanguage);
    }
    if book.chapters.is_empty() || book.spine.is_empty() {
        return Err(PackagingError::NoChapters);
    }
    Ok(())
}

/// Manifest ids are XML IDs: letter or underscore first, no spaces.
fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn is_relative_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

fn chapter_href<'a>(book: &'a Book, id: &str) -> &'a str {
    book.chapters
        .iter()
        .find(|c| c.id == id)
        .map(|c| c.path.as_str())
        .unwrap_or_default()
}

fn package_document(book: &Book, items: &[ManifestItem<'_>], options: &EpubOptions) -> String {
    let mut manifest = String::new();
    for item in items {
        let properties = item
            .properties
            .map(|p| format!(r#" properties="{}""#, p))
            .unwrap_or_default();
        manifest.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"{}/>\n",
            xml_escape(item.id),
            xml_escape(item.href),
            xml_escape(item.media_type),
            properties
        ));
    }

    let mut spine = String::new();
    for id in &book.spine {
        spine.push_str(&format!("    <itemref idref=\"{}\"/>\n", xml_escape(id)));
    }

    let (version, modified, spine_attr) = match options.version {
        EpubVersion::Epub3 => (
            "3.0",
            format!(
                "\n    <meta property=\"dcterms:modified\">{}</meta>",
                book.modified.format("%Y-%m-%dT%H:%M:%SZ")
            ),
            if options.has_ncx() { r#" toc="ncx""# } else { "" },
        ),
        EpubVersion::Epub2 => ("2.0", String::new(), r#" toc="ncx""#),
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="{version}">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator>{creator}</dc:creator>
    <dc:language>{language}</dc:language>{modified}
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine{spine_attr}>
{spine}  </spine>
</package>
"#,
        version = version,
        id = xml_escape(&book.identifier),
        title = xml_escape(&book.title),
        creator = xml_escape(&book.author),
        language = xml_escape(&book.language),
        modified = modified,
        manifest = manifest,
        spine_attr = spine_attr,
        spine = spine,
    )
}

fn nav_xhtml(book: &Book) -> String {
    let mut nav_links = String::new();
    for entry in &book.toc {
        nav_links.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            xml_escape(chapter_href(book, &entry.chapter_id)),
            xml_escape(&entry.title)
        ));
    }
    let lang = xml_escape(&book.language);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="{lang}" xml:lang="{lang}">
<head>
  <meta charset="UTF-8"/>
  <title>Table of Contents</title>
</head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>Contents</h1>
    <ol>
{links}    </ol>
  </nav>
</body>
</html>
"#,
        lang = lang,
        links = nav_links
    )
}

fn ncx(book: &Book) -> String {
    let mut nav_points = String::new();
    for (i, entry) in book.toc.iter().enumerate() {
        nav_points.push_str(&format!(
            r#"    <navPoint id="navpoint-{n}" playOrder="{n}">
      <navLabel><text>{label}</text></navLabel>
      <content src="{src}"/>
    </navPoint>
"#,
            n = i + 1,
            label = xml_escape(&entry.title),
            src = xml_escape(chapter_href(book, &entry.chapter_id))
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{}"/>
  </head>
  <docTitle>
    <text>{}</text>
  </docTitle>
  <navMap>
{}  </navMap>
</ncx>
"#,
        xml_escape(&book.identifier),
        xml_escape(&book.title),
        nav_points
    )
}

fn chapter_xhtml(book: &Book, index: usize, version: EpubVersion) -> String {
    let ch = &book.chapters[index];
    let title = xml_escape(&ch.title);
    let lang = xml_escape(&book.language);
    let doctype = match version {
        EpubVersion::Epub3 => "<!DOCTYPE html>",
        EpubVersion::Epub2 => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">"#
        }
    };
    let lang_attrs = match version {
        EpubVersion::Epub3 => format!(r#" lang="{lang}" xml:lang="{lang}""#, lang = lang),
        EpubVersion::Epub2 => format!(r#" xml:lang="{}""#, lang),
    };
    // XHTML 1.1 allows only block content directly under <body>.
    let body = match version {
        EpubVersion::Epub3 => ch.body.clone(),
        EpubVersion::Epub2 => format!("<div>{}</div>", ch.body),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
{doctype}
<html xmlns="http://www.w3.org/1999/xhtml"{lang_attrs}>
<head>
  <meta http-equiv="Content-Type" content="application/xhtml+xml; charset=utf-8"/>
  <title>{title}</title>
</head>
<body>
{body}
</body>
</html>
"#,
        doctype = doctype,
        lang_attrs = lang_attrs,
        title = title,
        body = body
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
