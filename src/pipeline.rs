//! End-to-end run: fetch page -> simplify -> resolve resources -> package EPUB.
//!
//! The pipeline owns no state beyond the book in flight and surfaces the first failure
//! unchanged.

use crate::epub::{write_epub, EpubOptions, PackagingError};
use crate::fetch::{FetchError, FetchResponse, Fetcher};
use crate::model::{Book, Document};
use crate::resolve::{Progress, ResolutionError, ResolveOptions, ResourceResolver};
use crate::simplify::{ExtractionError, Simplifier};
use encoding_rs::{Encoding, UTF_8};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_AUTHOR: &str = "instakindle";
pub const DEFAULT_LANGUAGE: &str = "en";

const MAX_FILE_STEM_CHARS: usize = 100;
/// How far into the page to look for a `<meta charset>` declaration.
const CHARSET_SNIFF_BYTES: usize = 1024;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Packaging(#[from] PackagingError),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub resolve: ResolveOptions,
    pub epub: EpubOptions,
    /// Author that overrides whatever the page declares.
    pub author: Option<String>,
    /// Language that overrides whatever the page declares.
    pub language: Option<String>,
    /// Author when neither the override nor the page provides one.
    pub fallback_author: String,
    /// Language when neither the override nor the page provides one.
    pub fallback_language: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            resolve: ResolveOptions::default(),
            epub: EpubOptions::default(),
            author: None,
            language: None,
            fallback_author: DEFAULT_AUTHOR.to_string(),
            fallback_language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

/// Where the container goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Exactly this file.
    File(PathBuf),
    /// `<dir>/<sanitized-title>.epub`.
    Directory(PathBuf),
}

impl Destination {
    pub fn path_for(&self, title: &str) -> PathBuf {
        match self {
            Destination::File(path) => path.clone(),
            Destination::Directory(dir) => output_path(dir, title),
        }
    }

    /// Directory the container will be written into. Empty for a bare file name.
    pub fn directory(&self) -> &Path {
        match self {
            Destination::File(path) => path.parent().unwrap_or_else(|| Path::new("")),
            Destination::Directory(dir) => dir,
        }
    }
}

/// Default output path: `<dir>/<sanitized-title>.epub`.
pub fn output_path(dir: &Path, title: &str) -> PathBuf {
    dir.join(format!("{}.epub", sanitize_title(title)))
}

/// Sanitize a title to a safe file stem: lowercase, runs of anything that is not a letter
/// or digit become a single `-`.
pub fn sanitize_title(title: &str) -> String {
    let mut s = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_alphanumeric() {
            s.extend(c.to_lowercase());
        } else if !s.ends_with('-') {
            s.push('-');
        }
    }
    let mut s: String = s.trim_matches('-').chars().take(MAX_FILE_STEM_CHARS).collect();
    while s.ends_with('-') {
        s.pop();
    }
    if s.is_empty() {
        s = "book".to_string();
    }
    s
}

/// Decode page bytes: header charset, then `<meta charset>`, then UTF-8 (BOM wins over both).
pub fn decode_page(response: &FetchResponse) -> String {
    let encoding = response
        .charset()
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .or_else(|| sniff_meta_charset(&response.data))
        .unwrap_or(UTF_8);
    let (text, used, had_errors) = encoding.decode(&response.data);
    if had_errors {
        log::warn!(
            "{}: page contained bytes invalid in {}; replaced",
            response.final_url,
            used.name()
        );
    }
    text.into_owned()
}

fn sniff_meta_charset(data: &[u8]) -> Option<&'static Encoding> {
    let head = &data[..data.len().min(CHARSET_SNIFF_BYTES)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    let start = head.find("charset=")? + "charset=".len();
    let label: String = head[start..]
        .trim_start_matches(&['"', '\''][..])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
        .collect();
    Encoding::for_label(label.as_bytes())
}

/// Composes the collaborators for one article.
pub struct Pipeline<'a> {
    fetcher: &'a dyn Fetcher,
    simplifier: &'a dyn Simplifier,
    options: PipelineOptions,
    progress: Option<Progress<'a>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        fetcher: &'a dyn Fetcher,
        simplifier: &'a dyn Simplifier,
        options: PipelineOptions,
    ) -> Self {
        Self {
            fetcher,
            simplifier,
            options,
            progress: None,
        }
    }

    /// Report resource download progress as (done, total).
    pub fn with_progress(mut self, progress: Progress<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Fetch and simplify the page. Returns the document and the page's final URL.
    pub fn extract(&self, url: &str) -> Result<(Document, String), PipelineError> {
        log::info!("fetching {}", url);
        let response = self.fetcher.fetch(url)?;
        log::debug!(
            "HTTP {} {} ({} bytes)",
            response.status,
            response.final_url,
            response.data.len()
        );
        let html = decode_page(&response);
        let document = self.simplifier.simplify(&html, &response.final_url)?;
        log::info!("extracted \"{}\"", document.title);
        Ok((document, response.final_url))
    }

    /// Everything up to, but not including, writing the container.
    pub fn assemble(&self, url: &str) -> Result<Book, PipelineError> {
        let (document, final_url) = self.extract(url)?;
        self.assemble_document(document, &final_url)
    }

    /// Resolve a simplified document's resources and build its book. `identifier` is the
    /// book's unique id (the page URL for fetched articles).
    pub fn assemble_document(
        &self,
        document: Document,
        identifier: &str,
    ) -> Result<Book, PipelineError> {
        let Document {
            title,
            mut content,
            author,
            language,
        } = document;

        let mut resolver = ResourceResolver::new(self.fetcher, self.options.resolve);
        if let Some(progress) = self.progress {
            resolver = resolver.with_progress(progress);
        }
        let parts = resolver.resolve(&mut content)?;

        let author = self
            .options
            .author
            .clone()
            .or(author)
            .unwrap_or_else(|| self.options.fallback_author.clone());
        let language = self
            .options
            .language
            .clone()
            .or(language)
            .unwrap_or_else(|| self.options.fallback_language.clone());

        let mut book = Book::new(identifier, title.clone(), language, author);
        book.add_chapter(title, content.to_xhtml());
        book.add_resources(parts);
        Ok(book)
    }

    /// Full run. Returns the path written.
    pub fn run(&self, url: &str, destination: &Destination) -> Result<PathBuf, PipelineError> {
        let book = self.assemble(url)?;
        let path = destination.path_for(&book.title);
        write_epub(&book, &path, &self.options.epub)?;
        log::info!(
            "packaged {} chapter(s) and {} resource(s)",
            book.chapters.len(),
            book.resources.len()
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::tests::FixtureFetcher;
    use crate::resolve::ResourceFailurePolicy;
    use crate::simplify::ReadabilitySimplifier;
    use crate::tree::ContentTree;
    use std::io::Read;
    use zip::read::ZipArchive;

    const ARTICLE_URL: &str = "https://example.com/article";

    /// Returns a fixed tree regardless of input.
    struct FixedSimplifier {
        title: &'static str,
        html: &'static str,
    }

    impl Simplifier for FixedSimplifier {
        fn simplify(&self, _html: &str, _base_url: &str) -> Result<Document, ExtractionError> {
            Ok(Document {
                title: self.title.to_string(),
                content: ContentTree::parse_fragment(self.html),
                author: None,
                language: None,
            })
        }
    }

    fn read_entry(zip: &mut ZipArchive<std::fs::File>, name: &str) -> String {
        let mut s = String::new();
        zip.by_name(name).unwrap().read_to_string(&mut s).unwrap();
        s
    }

    #[test]
    fn single_image_article_end_to_end() {
        let fetcher = FixtureFetcher::new()
            .with(ARTICLE_URL, Some("text/html"), b"<html></html>")
            .with("https://cdn.example.com/a/pic1.png", Some("image/png"), b"PNG");
        let simplifier = FixedSimplifier {
            title: "Title",
            html: r#"<div><h1>Title</h1><img src="https://cdn.example.com/a/pic1.png"></div>"#,
        };
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(&fetcher, &simplifier, PipelineOptions::default());

        let path = pipeline
            .run(ARTICLE_URL, &Destination::Directory(dir.path().to_path_buf()))
            .unwrap();
        assert_eq!(path, dir.path().join("title.epub"));

        let mut zip = ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
        let opf = read_entry(&mut zip, "OEBPS/content.opf");
        let items: Vec<&str> = opf
            .lines()
            .filter(|l| l.trim_start().starts_with("<item "))
            .collect();
        let chapters = items
            .iter()
            .filter(|l| l.contains("application/xhtml+xml") && !l.contains("nav"))
            .count();
        let images = items.iter().filter(|l| l.contains("image/png")).count();
        assert_eq!(chapters, 1);
        assert_eq!(images, 1);
        assert!(opf.contains(r#"href="images/pic1.png""#));
        assert!(opf.contains("<spine>\n    <itemref idref=\"chapter-1\"/>\n  </spine>"));
        assert!(opf.contains("<dc:creator>instakindle</dc:creator>"));
        assert!(opf.contains("<dc:language>en</dc:language>"));

        let chapter = read_entry(&mut zip, "OEBPS/chapter-1.xhtml");
        assert!(chapter.contains(r#"<div><h1>Title</h1><img src="images/pic1.png"/></div>"#));
        assert!(zip.by_name("OEBPS/images/pic1.png").is_ok());
    }

    #[test]
    fn page_fetch_failure_writes_nothing() {
        let fetcher = FixtureFetcher::new();
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(&fetcher, &ReadabilitySimplifier, PipelineOptions::default());
        let result = pipeline.run(ARTICLE_URL, &Destination::Directory(dir.path().to_path_buf()));
        assert!(matches!(
            result,
            Err(PipelineError::Fetch(FetchError::HttpStatus { status: 404, .. }))
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn resource_failure_aborts_by_default_and_skips_on_request() {
        let fetcher = FixtureFetcher::new().with(ARTICLE_URL, Some("text/html"), b"");
        let simplifier = FixedSimplifier {
            title: "Broken Images",
            html: r#"<p>text</p><img src="https://cdn.example.com/gone.png">"#,
        };
        let dir = tempfile::tempdir().unwrap();
        let dest = Destination::Directory(dir.path().to_path_buf());

        let strict = Pipeline::new(&fetcher, &simplifier, PipelineOptions::default());
        match strict.run(ARTICLE_URL, &dest) {
            Err(PipelineError::Resolution(ResolutionError::Fetch { url, .. })) => {
                assert_eq!(url, "https://cdn.example.com/gone.png")
            }
            other => panic!("expected resolution failure, got {:?}", other),
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let mut options = PipelineOptions::default();
        options.resolve.policy = ResourceFailurePolicy::Skip;
        let lenient = Pipeline::new(&fetcher, &simplifier, options);
        let book = lenient.assemble(ARTICLE_URL).unwrap();
        assert!(book.resources.is_empty());
        assert!(book.chapters[0]
            .body
            .contains(r#"src="https://cdn.example.com/gone.png""#));
        let path = lenient.run(ARTICLE_URL, &dest).unwrap();
        assert!(path.ends_with("broken-images.epub"));
    }

    #[test]
    fn page_metadata_and_overrides() {
        let page = r#"<html lang="fr"><head><title>Bonjour</title>
            <meta name="author" content="Jeanne"></head>
            <body><article><p>Un paragraphe assez long pour compter comme contenu.</p>
            <img src="/img/photo.jpg"></article></body></html>"#;
        let fetcher = FixtureFetcher::new()
            .with(ARTICLE_URL, Some("text/html; charset=utf-8"), page.as_bytes())
            .with("https://example.com/img/photo.jpg", Some("image/jpeg"), b"JPG");

        let pipeline = Pipeline::new(&fetcher, &ReadabilitySimplifier, PipelineOptions::default());
        let book = pipeline.assemble(ARTICLE_URL).unwrap();
        assert_eq!(book.title, "Bonjour");
        assert_eq!(book.author, "Jeanne");
        assert_eq!(book.language, "fr");
        assert_eq!(book.identifier, ARTICLE_URL);
        assert_eq!(book.resources.len(), 1);
        assert_eq!(book.resources[0].path, "images/photo.jpg");

        let options = PipelineOptions {
            author: Some("Override".to_string()),
            language: Some("en-GB".to_string()),
            ..PipelineOptions::default()
        };
        let pipeline = Pipeline::new(&fetcher, &ReadabilitySimplifier, options);
        let book = pipeline.assemble(ARTICLE_URL).unwrap();
        assert_eq!(book.author, "Override");
        assert_eq!(book.language, "en-GB");
    }

    #[test]
    fn chapter_keeps_no_remote_resource_references() {
        let page = r#"<html><head><title>Media</title></head><body><article>
            <p>A paragraph long enough to be picked as the article body.</p>
            <picture><source srcset="https://cdn.example.com/big.webp">
              <img src="/small.png" srcset="https://cdn.example.com/small@2x.png 2x"></picture>
            <video src="https://cdn.example.com/clip.mp4" poster="https://cdn.example.com/poster.jpg"></video>
            <img src="data:image/gif;base64,R0lGOD" data-src="https://cdn.example.com/lazy.jpg">
            <img srcset="https://cdn.example.com/only.png 1x">
            <p>See <a href="/about">about</a>.</p>
            </article></body></html>"#;
        let fetcher = FixtureFetcher::new()
            .with(ARTICLE_URL, Some("text/html"), page.as_bytes())
            .with("https://example.com/small.png", Some("image/png"), b"S")
            .with("https://cdn.example.com/lazy.jpg", Some("image/jpeg"), b"L")
            .with("https://cdn.example.com/only.png", Some("image/png"), b"O");
        let pipeline = Pipeline::new(&fetcher, &ReadabilitySimplifier, PipelineOptions::default());

        let book = pipeline.assemble(ARTICLE_URL).unwrap();
        assert_eq!(book.resources.len(), 3);
        let body = &book.chapters[0].body;
        for attr in ["src", "srcset", "poster", "data-src", "data-srcset"] {
            for scheme in ["http://", "https://"] {
                let remote = format!("{}=\"{}", attr, scheme);
                assert!(!body.contains(&remote), "{} left in {}", remote, body);
            }
        }
        assert!(body.contains(r#"href="https://example.com/about""#));
    }

    #[test]
    fn extraction_failure_propagates() {
        let fetcher = FixtureFetcher::new().with(
            ARTICLE_URL,
            Some("text/html"),
            b"<html><head><title>Nothing</title></head><body></body></html>",
        );
        let pipeline = Pipeline::new(&fetcher, &ReadabilitySimplifier, PipelineOptions::default());
        assert!(matches!(
            pipeline.assemble(ARTICLE_URL),
            Err(PipelineError::Extraction(ExtractionError::NoContent { .. }))
        ));
    }

    #[test]
    fn sanitize_title_cases() {
        assert_eq!(sanitize_title(""), "book");
        assert_eq!(sanitize_title("My  Story!"), "my-story");
        assert_eq!(sanitize_title("  --  a  --  b  --  "), "a-b");
        assert_eq!(sanitize_title("../../etc/passwd"), "etc-passwd");
        assert_eq!(sanitize_title("Ünïcode Title"), "ünïcode-title");
        assert_eq!(sanitize_title("???"), "book");
        assert!(sanitize_title(&"word ".repeat(60)).chars().count() <= MAX_FILE_STEM_CHARS);
        assert!(!sanitize_title(&"ab ".repeat(60)).ends_with('-'));
    }

    #[test]
    fn destination_paths() {
        assert_eq!(
            Destination::Directory(PathBuf::from("out")).path_for("My Book"),
            PathBuf::from("out/my-book.epub")
        );
        assert_eq!(
            Destination::File(PathBuf::from("x.epub")).path_for("Ignored"),
            PathBuf::from("x.epub")
        );
        assert_eq!(
            Destination::File(PathBuf::from("out/x.epub")).directory(),
            Path::new("out")
        );
        assert_eq!(Destination::File(PathBuf::from("x.epub")).directory(), Path::new(""));
        assert_eq!(
            Destination::Directory(PathBuf::from("books")).directory(),
            Path::new("books")
        );
    }

    fn response(content_type: Option<&str>, data: &[u8]) -> FetchResponse {
        FetchResponse {
            status: 200,
            content_type: content_type.map(String::from),
            data: data.to_vec(),
            final_url: ARTICLE_URL.to_string(),
        }
    }

    #[test]
    fn decode_page_honours_charsets() {
        // "café" in windows-1252
        let latin = b"<p>caf\xe9</p>";
        assert_eq!(
            decode_page(&response(Some("text/html; charset=windows-1252"), latin)),
            "<p>café</p>"
        );
        let sniffed = b"<html><head><meta charset=\"iso-8859-1\"></head><p>caf\xe9</p>";
        assert!(decode_page(&response(Some("text/html"), sniffed)).contains("café"));
        assert_eq!(
            decode_page(&response(None, "<p>café</p>".as_bytes())),
            "<p>café</p>"
        );
    }
}
