//! Readability-style extraction: reduce a full page to its title, article body, and
//! byline metadata.

use crate::model::Document;
use crate::tree::ContentTree;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Minimum text, in characters, for a block to count as article content.
const MIN_CONTENT_CHARS: usize = 25;

/// Containers that mark the main content when a page uses semantic markup.
const SEMANTIC_CANDIDATES: &str = r#"article, [itemprop="articleBody"], main, [role="main"]"#;

/// Chrome removed from the extracted content, along with embedded media other than `img`
/// (their sources would stay remote).
const NOISE: &str = "script, style, noscript, iframe, nav, aside, form, button, input, select, \
                     textarea, footer, svg, object, embed, link, meta, source, video, audio, \
                     track";

const ARTICLE_TYPES: &[&str] = &[
    "Article",
    "NewsArticle",
    "BlogPosting",
    "Report",
    "TechArticle",
    "ScholarlyArticle",
    "AnalysisNewsArticle",
];

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Could not find a title for {url}.")]
    NoTitle { url: String },

    #[error("Could not find main article content at {url}.")]
    NoContent { url: String },
}

/// Reduces raw page HTML to a [Document].
pub trait Simplifier {
    /// `base_url` is the page's final URL; relative image sources are resolved against it.
    fn simplify(&self, html: &str, base_url: &str) -> Result<Document, ExtractionError>;
}

/// Heuristic extractor: semantic containers first, then paragraph scoring.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadabilitySimplifier;

impl Simplifier for ReadabilitySimplifier {
    fn simplify(&self, html: &str, base_url: &str) -> Result<Document, ExtractionError> {
        let page = Html::parse_document(html);
        let article_meta = json_ld_article(&page);

        let title = article_meta
            .as_ref()
            .and_then(|a| a.headline.clone())
            .or_else(|| page_title(&page))
            .ok_or_else(|| ExtractionError::NoTitle {
                url: base_url.to_string(),
            })?;

        let author = article_meta
            .and_then(|a| a.author)
            .or_else(|| meta_content(&page, r#"meta[name="author"]"#));

        let language = select_first(&page, "html")
            .and_then(|html| html.value().attr("lang"))
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());

        let main = main_content(&page).ok_or_else(|| ExtractionError::NoContent {
            url: base_url.to_string(),
        })?;
        let content = ContentTree::parse_fragment(&main.html());
        let removed = content.remove_matching(NOISE);
        log::debug!("removed {} non-content element(s)", removed);
        content.promote_lazy_images();
        if let Ok(base) = Url::parse(base_url) {
            content.absolutize_references(&base);
        }
        if content.text().trim().is_empty() && content.image_refs().is_empty() {
            return Err(ExtractionError::NoContent {
                url: base_url.to_string(),
            });
        }

        Ok(Document {
            title,
            content,
            author,
            language,
        })
    }
}

struct ArticleMeta {
    headline: Option<String>,
    author: Option<String>,
}

fn selector(sel: &str) -> Option<Selector> {
    match Selector::parse(sel) {
        Ok(s) => Some(s),
        Err(e) => {
            log::warn!("invalid selector {:?}: {}", sel, e);
            None
        }
    }
}

fn select_first<'a>(page: &'a Html, sel: &str) -> Option<ElementRef<'a>> {
    let sel = selector(sel)?;
    let found = page.select(&sel).next();
    found
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn meta_content(page: &Html, sel: &str) -> Option<String> {
    select_first(page, sel)
        .and_then(|m| m.value().attr("content"))
        .map(collapse_whitespace)
        .and_then(non_empty)
}

/// Title from `og:title`, then `<title>` minus a trailing site name, then the first `<h1>`.
fn page_title(page: &Html) -> Option<String> {
    if let Some(t) = meta_content(page, r#"meta[property="og:title"]"#) {
        return Some(t);
    }
    let site_name = meta_content(page, r#"meta[property="og:site_name"]"#);
    if let Some(t) = select_first(page, "title")
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .and_then(non_empty)
    {
        return Some(match site_name {
            Some(site) => strip_title_site_suffix(&t, &site),
            None => t,
        });
    }
    select_first(page, "h1")
        .map(|h| collapse_whitespace(&h.text().collect::<String>()))
        .and_then(non_empty)
}

/// Strip `" | Site"`-style suffixes so separators inside the real title survive.
fn strip_title_site_suffix(title: &str, site: &str) -> String {
    for sep in [" | ", " - ", " — ", " · ", " :: "] {
        let suffix = format!("{}{}", sep, site);
        if let Some(stripped) = title.strip_suffix(&suffix) {
            let stripped = stripped.trim();
            if !stripped.is_empty() {
                return stripped.to_string();
            }
        }
    }
    title.to_string()
}

/// First Article-like object in the page's JSON-LD blocks.
fn json_ld_article(page: &Html) -> Option<ArticleMeta> {
    let sel = selector(r#"script[type="application/ld+json"]"#)?;
    page.select(&sel).find_map(|script| {
        let raw: String = script.text().collect();
        let value: Value = serde_json::from_str(raw.trim()).ok()?;
        let article = find_article(&value)?;
        let headline = ["headline", "name"]
            .iter()
            .find_map(|k| article.get(*k).and_then(Value::as_str))
            .map(collapse_whitespace)
            .and_then(non_empty);
        let author = article.get("author").and_then(author_name);
        Some(ArticleMeta { headline, author })
    })
}

fn find_article(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_article),
        Value::Object(obj) => {
            if is_article_type(obj.get("@type")) {
                return Some(value);
            }
            obj.get("@graph").and_then(find_article)
        }
        _ => None,
    }
}

fn is_article_type(t: Option<&Value>) -> bool {
    match t {
        Some(Value::String(s)) => ARTICLE_TYPES.contains(&s.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .any(|t| t.as_str().is_some_and(|s| ARTICLE_TYPES.contains(&s))),
        _ => false,
    }
}

fn author_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(collapse_whitespace(s)),
        Value::Object(obj) => obj
            .get("name")
            .and_then(Value::as_str)
            .map(collapse_whitespace)
            .and_then(non_empty),
        Value::Array(items) => items.iter().find_map(author_name),
        _ => None,
    }
}

fn text_len(el: &ElementRef<'_>) -> usize {
    el.text().map(|t| t.trim().chars().count()).sum()
}

/// Pick the element holding the article body.
fn main_content(page: &Html) -> Option<ElementRef<'_>> {
    if let Some(sel) = selector(SEMANTIC_CANDIDATES) {
        let best = page
            .select(&sel)
            .map(|el| (text_len(&el), el))
            .filter(|(len, _)| *len >= MIN_CONTENT_CHARS)
            .max_by_key(|(len, _)| *len);
        if let Some((_, el)) = best {
            return Some(el);
        }
    }
    if let Some(el) = best_scored_container(page) {
        return Some(el);
    }
    select_first(page, "body").filter(|body| text_len(body) >= MIN_CONTENT_CHARS)
}

/// Paragraph scoring: each substantial paragraph credits its parent fully and its
/// grandparent by half; the highest-scoring container wins.
fn best_scored_container(page: &Html) -> Option<ElementRef<'_>> {
    let sel = selector("p, pre")?;
    let mut scores = HashMap::new();
    for p in page.select(&sel) {
        let text: String = p.text().collect();
        let len = text.trim().chars().count();
        if len < MIN_CONTENT_CHARS {
            continue;
        }
        let commas = text.matches(',').count() as f64;
        let score = 1.0 + commas + (len as f64 / 100.0).min(3.0);
        let Some(parent) = p.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        scores.entry(parent.id()).or_insert((parent, 0.0f64)).1 += score;
        if let Some(grandparent) = parent.parent().and_then(ElementRef::wrap) {
            scores.entry(grandparent.id()).or_insert((grandparent, 0.0)).1 += score / 2.0;
        }
    }
    scores
        .into_values()
        .filter(|(el, _)| el.value().name() != "html")
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(el, _)| el)
}
