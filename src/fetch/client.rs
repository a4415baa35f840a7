//! Blocking HTTP fetcher with a request timeout, optional politeness delay, and retries.

use super::{FetchError, FetchResponse, Fetcher};
use reqwest::StatusCode;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; instakindle/0.1; +https://github.com/instakindle)";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_REDIRECTS: usize = 10;

/// Default number of attempts per URL (initial plus retries).
const DEFAULT_RETRY_COUNT: u32 = 3;
/// Default backoff delays in seconds after each failed attempt.
const DEFAULT_BACKOFF_SECS: [u64; 2] = [1, 2];
/// Backoff for HTTP 429 (rate limit).
const BACKOFF_429_SECS: [u64; 3] = [10, 30, 60];

/// Blocking fetcher. Safe to share between resource workers; the politeness delay is
/// enforced across all of them.
#[derive(Debug)]
pub struct HttpFetcher {
    inner: reqwest::blocking::Client,
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
    retry_count: u32,
    backoff_secs: Vec<u64>,
}

impl HttpFetcher {
    /// Fetcher with default User-Agent, timeout, and retries, and no delay.
    pub fn new() -> Result<Self, FetchError> {
        Self::builder().build()
    }

    pub fn builder() -> HttpFetcherBuilder {
        HttpFetcherBuilder::default()
    }

    /// GET with retries for transient failures.
    ///
    /// Retries on timeout, connection errors, HTTP 5xx and HTTP 429. Other statuses are
    /// returned to the caller as-is.
    fn get_with_retry(&self, url: &str) -> Result<reqwest::blocking::Response, FetchError> {
        let max_attempts = self.retry_count.max(1);
        let mut attempt = 0;
        loop {
            self.wait_turn();
            let last_attempt = attempt + 1 >= max_attempts;
            match self.inner.get(url).send() {
                Ok(response) => {
                    let status = response.status();
                    let retryable =
                        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
                    if !retryable || last_attempt {
                        return Ok(response);
                    }
                    let backoff = if status == StatusCode::TOO_MANY_REQUESTS {
                        backoff_at(&BACKOFF_429_SECS, attempt)
                    } else {
                        backoff_at(&self.backoff_secs, attempt)
                    };
                    log::debug!(
                        "HTTP {} from {}; retrying in {}s",
                        status.as_u16(),
                        url,
                        backoff
                    );
                    std::thread::sleep(Duration::from_secs(backoff));
                }
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    if !retryable || last_attempt {
                        return Err(FetchError::from_transport(url, e));
                    }
                    let backoff = backoff_at(&self.backoff_secs, attempt);
                    log::debug!("{} failed ({}); retrying in {}s", url, e, backoff);
                    std::thread::sleep(Duration::from_secs(backoff));
                }
            }
            attempt += 1;
        }
    }

    /// Sleeps until the delay has passed since the previous request, then claims the slot.
    fn wait_turn(&self) {
        if self.delay.is_zero() {
            return;
        }
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.delay {
                std::thread::sleep(self.delay - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

fn backoff_at(table: &[u64], attempt: u32) -> u64 {
    table
        .get(attempt as usize)
        .or_else(|| table.last())
        .copied()
        .unwrap_or(1)
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            input: url.to_string(),
            reason: e.to_string(),
        })?;
        let response = self.get_with_retry(url)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let data = response.bytes().map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::BodyRead {
                    url: url.to_string(),
                    source: e,
                }
            }
        })?;
        log::debug!("fetched {} ({} bytes)", final_url, data.len());
        Ok(FetchResponse {
            status: status.as_u16(),
            content_type,
            data: data.to_vec(),
            final_url,
        })
    }
}

/// Builder for [HttpFetcher].
#[derive(Debug)]
pub struct HttpFetcherBuilder {
    user_agent: Option<String>,
    delay_secs: u64,
    timeout_secs: u64,
    retry_count: u32,
    retry_backoff_secs: Vec<u64>,
}

impl Default for HttpFetcherBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_secs: 0,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
        }
    }
}

impl HttpFetcherBuilder {
    /// Set a custom User-Agent. If not set, a browser-like default is used.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Minimum delay between requests in seconds. Default 0.
    pub fn delay_secs(mut self, secs: u64) -> Self {
        self.delay_secs = secs;
        self
    }

    /// Per-request timeout in seconds. Default 30.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Attempts per URL for transient failures (default 3, minimum 1).
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Backoff delays in seconds before each retry; the last value is reused when short.
    pub fn retry_backoff_secs(mut self, secs: Vec<u64>) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    pub fn build(self) -> Result<HttpFetcher, FetchError> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|source| FetchError::Client { source })?;
        let backoff_secs = if self.retry_backoff_secs.is_empty() {
            let n = self.retry_count.saturating_sub(1) as usize;
            (0..n).map(|i| 1u64 << i.min(4)).collect::<Vec<_>>()
        } else {
            self.retry_backoff_secs
        };
        Ok(HttpFetcher {
            inner,
            delay: Duration::from_secs(self.delay_secs),
            last_request: Mutex::new(None),
            retry_count: self.retry_count,
            backoff_secs,
        })
    }
}
