//! Mutable content tree for the simplified article, backed by kuchiki.
//!
//! The tree is rooted at a synthetic `<body>`; serialization emits only the body's children.

use kuchiki::traits::TendrilSink;
use kuchiki::{ElementData, NodeData, NodeDataRef, NodeRef};
use reqwest::Url;
use std::fmt::Write as _;

/// Elements that never have content; serialized self-closed.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// `img` attributes that carry alternative source URLs.
const CANDIDATE_ATTRS: &[&str] = &["srcset", "sizes", "data-src", "data-srcset"];

/// Markup fragment owned by one pipeline run.
pub struct ContentTree {
    root: NodeRef,
}

/// An `img` element with a non-empty `src`, in document order.
#[derive(Clone)]
pub struct ImageRef {
    element: NodeDataRef<ElementData>,
}

impl ImageRef {
    pub fn src(&self) -> String {
        self.element
            .attributes
            .borrow()
            .get("src")
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    /// Point the element at `path` and drop responsive and lazy-load candidates that still
    /// name the original host.
    pub fn set_src(&self, path: &str) {
        let mut attrs = self.element.attributes.borrow_mut();
        attrs.insert("src", path.to_string());
        for name in CANDIDATE_ATTRS {
            attrs.remove(*name);
        }
    }
}

impl ContentTree {
    /// Parse an HTML fragment. Whatever the fragment contains ends up under one `<body>`.
    pub fn parse_fragment(html: &str) -> Self {
        let document = kuchiki::parse_html().one(format!(
            "<!DOCTYPE html><html><head></head><body>{}</body></html>",
            html
        ));
        let root = match document.select_first("body") {
            Ok(body) => body.as_node().clone(),
            Err(()) => document,
        };
        ContentTree { root }
    }

    /// Every `img` with a non-empty `src`, in document order.
    pub fn image_refs(&self) -> Vec<ImageRef> {
        let Ok(images) = self.root.select("img") else {
            return Vec::new();
        };
        images
            .filter(|img| {
                img.attributes
                    .borrow()
                    .get("src")
                    .is_some_and(|s| !s.trim().is_empty())
            })
            .map(|element| ImageRef { element })
            .collect()
    }

    /// Detach every element matching `selectors` (CSS selector list). Returns the number removed.
    pub fn remove_matching(&self, selectors: &str) -> usize {
        let Ok(matches) = self.root.select(selectors) else {
            log::warn!("invalid selector list: {}", selectors);
            return 0;
        };
        let doomed: Vec<NodeRef> = matches
            .map(|el| el.as_node().clone())
            .filter(|node| node != &self.root)
            .collect();
        for node in &doomed {
            node.detach();
        }
        doomed.len()
    }

    /// Give every image a single `src`.
    ///
    /// Images without a usable `src` (missing, blank or a `data:` placeholder) take
    /// `data-src`, else the first candidate of `data-srcset` or `srcset`. Images still
    /// without a `src` lose their candidate attributes so no remote URL lingers on them.
    pub fn promote_lazy_images(&self) {
        let Ok(images) = self.root.select("img") else {
            return;
        };
        for img in images {
            let mut attrs = img.attributes.borrow_mut();
            let has_src = attrs
                .get("src")
                .is_some_and(|s| !s.trim().is_empty() && !s.trim_start().starts_with("data:"));
            if has_src {
                continue;
            }
            let lazy = attrs
                .get("data-src")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .or_else(|| attrs.get("data-srcset").and_then(first_candidate))
                .or_else(|| attrs.get("srcset").and_then(first_candidate));
            match lazy {
                Some(src) => {
                    attrs.insert("src", src);
                }
                None => {
                    for name in CANDIDATE_ATTRS {
                        attrs.remove(*name);
                    }
                }
            }
        }
    }

    /// Resolve relative image sources and link targets against `base`.
    ///
    /// Fragment-only links (`#note-1`) and values that already parse as absolute URLs
    /// are left alone, as are values that cannot be joined.
    pub fn absolutize_references(&self, base: &Url) {
        for image in self.image_refs() {
            if let Some(abs) = join_relative(base, &image.src()) {
                image.element.attributes.borrow_mut().insert("src", abs);
            }
        }
        let Ok(links) = self.root.select("a[href]") else {
            return;
        };
        for link in links {
            let mut attrs = link.attributes.borrow_mut();
            let href = attrs.get("href").map(|h| h.trim().to_string());
            let abs = href
                .filter(|h| !h.is_empty() && !h.starts_with('#'))
                .and_then(|h| join_relative(base, &h));
            if let Some(abs) = abs {
                attrs.insert("href", abs);
            }
        }
    }

    /// Concatenated text content of the tree.
    pub fn text(&self) -> String {
        self.root.text_contents()
    }

    /// Serialize the tree's content as well-formed XHTML.
    pub fn to_xhtml(&self) -> String {
        let mut out = String::new();
        for child in self.root.children() {
            write_xhtml(&child, &mut out);
        }
        out
    }
}

fn join_relative(base: &Url, reference: &str) -> Option<String> {
    if Url::parse(reference).is_ok() {
        return None;
    }
    base.join(reference).ok().map(String::from)
}

/// URL of the first entry in a `srcset` list (`"a.png 1x, b.png 2x"` -> `a.png`).
fn first_candidate(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .filter_map(|c| c.split_whitespace().next())
        .find(|url| !url.is_empty())
        .map(String::from)
}

fn write_xhtml(node: &NodeRef, out: &mut String) {
    match node.data() {
        NodeData::Element(el) => {
            let tag = el.name.local.to_string().to_ascii_lowercase();
            out.push('<');
            out.push_str(&tag);
            let attrs = el.attributes.borrow();
            for (name, attr) in attrs.map.iter() {
                let key = name.local.as_ref();
                if !is_xml_name(key) || key.starts_with("xmlns") {
                    continue;
                }
                let _ = write!(out, " {}=\"", key.to_ascii_lowercase());
                escape_xml(&attr.value, true, out);
                out.push('"');
            }
            if VOID_ELEMENTS.contains(&tag.as_str()) {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for child in node.children() {
                write_xhtml(&child, out);
            }
            out.push_str("</");
            out.push_str(&tag);
            out.push('>');
        }
        NodeData::Text(text) => escape_xml(&text.borrow(), false, out),
        NodeData::Document(_) | NodeData::DocumentFragment => {
            for child in node.children() {
                write_xhtml(&child, out);
            }
        }
        _ => {}
    }
}

fn escape_xml(s: &str, attribute: bool, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c if is_xml_char(c) => out.push(c),
            _ => {}
        }
    }
}

/// XML 1.0 Char production.
fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

/// Conservative XML name check for attribute names; no namespace prefixes.
fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
