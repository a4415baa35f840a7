//! Run-scoped identifiers and container paths for resolved resources.

use super::media;
use reqwest::Url;
use std::collections::HashSet;

/// Directory, relative to the package document, that holds resolved resources.
pub const RESOURCE_DIR: &str = "images";

const MAX_BASENAME_LEN: usize = 96;

/// Hands out manifest ids and unique container paths for one resolution.
///
/// Ids are `image0`, `image1`, ... in allocation order. Paths are `images/<basename>`;
/// a basename already taken (case-insensitively) is prefixed with the id.
#[derive(Debug, Default)]
pub struct ResourceIds {
    next: usize,
    taken: HashSet<String>,
}

impl ResourceIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> String {
        let id = format!("image{}", self.next);
        self.next += 1;
        id
    }

    /// Container path for the resource at `url`. Never returns a path handed out before.
    pub fn path_for(&mut self, id: &str, url: &str, media_type: &str) -> String {
        let base = basename(url, id, media_type);
        let mut candidate = format!("{}/{}", RESOURCE_DIR, base);
        if self.taken.contains(&candidate.to_ascii_lowercase()) {
            candidate = format!("{}/{}-{}", RESOURCE_DIR, id, base);
            let mut n = 1;
            while self.taken.contains(&candidate.to_ascii_lowercase()) {
                candidate = format!("{}/{}-{}-{}", RESOURCE_DIR, id, n, base);
                n += 1;
            }
        }
        self.taken.insert(candidate.to_ascii_lowercase());
        candidate
    }
}

/// Sanitized last path segment of `url`, with an extension added from the media type
/// when the segment has none. Falls back to `id`.
fn basename(url: &str, id: &str, media_type: &str) -> String {
    let segment = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.next_back().map(String::from))
        })
        .unwrap_or_default();
    let mut name: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    name = name.trim_start_matches('.').to_string();
    if name.len() > MAX_BASENAME_LEN {
        let cut = name.len() - MAX_BASENAME_LEN;
        name = name[cut..].to_string();
    }
    if name.trim_matches(|c| c == '_' || c == '.').is_empty() {
        name = id.to_string();
    }
    let has_extension = name
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty());
    if !has_extension {
        if let Some(ext) = media::extension_for(media_type) {
            name = format!("{}.{}", name.trim_end_matches('.'), ext);
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_and_never_repeat() {
        let mut ids = ResourceIds::new();
        let got: Vec<String> = (0..3).map(|_| ids.next_id()).collect();
        assert_eq!(got, vec!["image0", "image1", "image2"]);
    }

    #[test]
    fn path_uses_last_segment() {
        let mut ids = ResourceIds::new();
        let id = ids.next_id();
        assert_eq!(
            ids.path_for(&id, "https://cdn.example.com/a/pic1.png", "image/png"),
            "images/pic1.png"
        );
    }

    #[test]
    fn same_basename_from_different_urls_is_disambiguated() {
        let mut ids = ResourceIds::new();
        let a = ids.next_id();
        let b = ids.next_id();
        let first = ids.path_for(&a, "https://one.test/x/photo.jpg", "image/jpeg");
        let second = ids.path_for(&b, "https://two.test/y/photo.jpg", "image/jpeg");
        assert_eq!(first, "images/photo.jpg");
        assert_eq!(second, "images/image1-photo.jpg");
    }

    #[test]
    fn case_only_collision_is_disambiguated() {
        let mut ids = ResourceIds::new();
        let a = ids.next_id();
        let b = ids.next_id();
        let first = ids.path_for(&a, "https://x.test/Logo.png", "image/png");
        let second = ids.path_for(&b, "https://x.test/logo.png", "image/png");
        assert_ne!(first.to_ascii_lowercase(), second.to_ascii_lowercase());
    }

    #[test]
    fn prefixed_candidate_collision_gets_counter() {
        let mut ids = ResourceIds::new();
        let a = ids.next_id();
        let b = ids.next_id();
        let taken = ids.path_for(&a, "https://x.test/image1-a.png", "image/png");
        assert_eq!(taken, "images/image1-a.png");
        let plain = ids.path_for(&a, "https://y.test/a.png", "image/png");
        assert_eq!(plain, "images/a.png");
        let third = ids.path_for(&b, "https://z.test/a.png", "image/png");
        assert_eq!(third, "images/image1-1-a.png");
    }

    #[test]
    fn missing_extension_comes_from_media_type() {
        let mut ids = ResourceIds::new();
        let id = ids.next_id();
        assert_eq!(
            ids.path_for(&id, "https://x.test/render?id=4", "image/webp"),
            "images/render.webp"
        );
    }

    #[test]
    fn empty_segment_falls_back_to_id() {
        let mut ids = ResourceIds::new();
        let id = ids.next_id();
        assert_eq!(
            ids.path_for(&id, "https://x.test/gallery/", "image/gif"),
            "images/image0.gif"
        );
        let id = ids.next_id();
        assert_eq!(
            ids.path_for(&id, "https://x.test/..", "application/octet-stream"),
            "images/image1"
        );
    }

    #[test]
    fn unsafe_characters_are_replaced() {
        let mut ids = ResourceIds::new();
        let id = ids.next_id();
        assert_eq!(
            ids.path_for(&id, "https://x.test/my%20pic(1).png", "image/png"),
            "images/my_20pic_1_.png"
        );
    }
}
