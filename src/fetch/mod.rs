//! Retrieval of pages and embedded resources. The pipeline only sees the [Fetcher] trait;
//! [HttpFetcher] is the network-backed implementation used by the CLI.

mod client;
mod error;

pub use client::{HttpFetcher, HttpFetcherBuilder};
pub use error::FetchError;

/// A successful response: status was 2xx and the body was read completely.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    /// Raw `Content-Type` header value, parameters included.
    pub content_type: Option<String>,
    pub data: Vec<u8>,
    /// URL after redirects.
    pub final_url: String,
}

impl FetchResponse {
    /// Media type without parameters, lowercased (e.g. `image/png` for `image/png; q=1`).
    pub fn media_type(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .filter(|mt| !mt.is_empty())
    }

    /// `charset` parameter of the content type, if present.
    pub fn charset(&self) -> Option<&str> {
        self.content_type.as_deref()?.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            if key.trim().eq_ignore_ascii_case("charset") {
                Some(value.trim().trim_matches('"'))
            } else {
                None
            }
        })
    }
}

/// Retrieves a URL. Non-success statuses are errors, not responses.
///
/// Implementations are shared by concurrent resource workers, hence `Sync`.
pub trait Fetcher: Sync {
    fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}
