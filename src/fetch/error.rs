//! Error type for page and resource retrieval.

use thiserror::Error;

/// Failure to retrieve a URL: bad input, transport failure, timeout, or non-success status.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Failed to create HTTP client: {source}")]
    Client { source: reqwest::Error },

    #[error("Network error: could not reach {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("Timed out fetching {url}")]
    Timeout { url: String },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead { url: String, source: reqwest::Error },
}

impl FetchError {
    pub(crate) fn from_transport(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                source: e,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_message_names_status_and_url() {
        let e = FetchError::HttpStatus {
            status: 500,
            url: "https://example.com/article".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "HTTP 500 when fetching: https://example.com/article"
        );
    }

    #[test]
    fn timeout_reports_url() {
        let e = FetchError::Timeout {
            url: "https://cdn.example.com/a.png".to_string(),
        };
        assert!(e.to_string().contains("Timed out"));
        assert!(e.to_string().contains("https://cdn.example.com/a.png"));
    }
}
