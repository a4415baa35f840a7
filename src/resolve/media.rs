//! Media type guessing for fetched resources.

/// Guess a media type from the extension of a URL or path.
pub fn guess_media_type(path: &str) -> &'static str {
    let path = path.split(['?', '#']).next().unwrap_or("");
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "bmp" => "image/bmp",
        "ico" => "image/vnd.microsoft.icon",
        _ => "application/octet-stream",
    }
}

/// EPUB 3 core image media types: readers must render these without a fallback.
pub fn is_core_media_type(media_type: &str) -> bool {
    matches!(
        media_type,
        "image/jpeg" | "image/png" | "image/gif" | "image/svg+xml" | "image/webp"
    )
}

/// File extension for a media type, if it is one we know.
pub fn extension_for(media_type: &str) -> Option<&'static str> {
    match media_type {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/svg+xml" => Some("svg"),
        "image/webp" => Some("webp"),
        "image/avif" => Some("avif"),
        "image/bmp" => Some("bmp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_from_extension_ignoring_query() {
        assert_eq!(guess_media_type("https://x.test/a/pic.PNG?w=300"), "image/png");
        assert_eq!(guess_media_type("https://x.test/photo.jpeg#frag"), "image/jpeg");
        assert_eq!(guess_media_type("https://x.test/v1.2/blob"), "application/octet-stream");
        assert_eq!(guess_media_type("images/x.svg"), "image/svg+xml");
    }

    #[test]
    fn core_media_types() {
        assert!(is_core_media_type("image/png"));
        assert!(is_core_media_type("image/webp"));
        assert!(!is_core_media_type("image/avif"));
        assert!(!is_core_media_type("image/bmp"));
        assert!(!is_core_media_type("application/octet-stream"));
    }

    #[test]
    fn extension_lookup() {
        assert_eq!(extension_for("image/jpeg"), Some("jpg"));
        assert_eq!(extension_for("image/webp"), Some("webp"));
        assert_eq!(extension_for("text/html"), None);
    }
}
