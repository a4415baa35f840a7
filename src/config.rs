//! Optional config file loading. Search order: ./instakindle.toml, then
//! $XDG_CONFIG_HOME/instakindle/config.toml (or the platform config dir).

use serde::Deserialize;
use std::path::PathBuf;

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Default output directory when -o is not set. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Request timeout in seconds, applied to the page and to every resource.
    pub timeout_secs: Option<u64>,
    /// Minimum delay in seconds between requests (default 0).
    pub request_delay_secs: Option<u64>,
    /// HTTP attempts for transient failures (default 3).
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry (e.g. [1, 2]).
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Concurrent resource downloads (default 4).
    pub jobs: Option<usize>,
    /// What to do when an image cannot be fetched: abort (default) or skip.
    pub on_resource_error: Option<String>,
    /// Author used when the page names none.
    pub author: Option<String>,
    /// Language used when the page declares none.
    pub language: Option<String>,
    /// Include toc.ncx in EPUB 3 output.
    pub ncx: Option<bool>,
}

/// Search order: (1) ./instakindle.toml, (2) <config dir>/instakindle/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("instakindle.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("instakindle").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            let s = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
            let config: Config = toml::from_str(&s)
                .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
            log::debug!("loaded config from {}", path.display());
            return Ok(Some(config));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let c: Config = toml::from_str("").unwrap();
        assert!(c.output_dir.is_none());
        assert!(c.user_agent.is_none());
        assert!(c.timeout_secs.is_none());
        assert!(c.request_delay_secs.is_none());
        assert!(c.retry_count.is_none());
        assert!(c.retry_backoff_secs.is_none());
        assert!(c.jobs.is_none());
        assert!(c.on_resource_error.is_none());
        assert!(c.author.is_none());
        assert!(c.language.is_none());
        assert!(c.ncx.is_none());
    }

    #[test]
    fn parse_full_config() {
        let s = r#"
            output_dir = "books"
            user_agent = "Custom/1.0"
            timeout_secs = 10
            request_delay_secs = 1
            retry_count = 5
            retry_backoff_secs = [1, 2, 4, 8]
            jobs = 8
            on_resource_error = "skip"
            author = "Me"
            language = "fr"
            ncx = true
        "#;
        let c: Config = toml::from_str(s).unwrap();
        assert_eq!(c.output_dir.as_deref(), Some(std::path::Path::new("books")));
        assert_eq!(c.user_agent.as_deref(), Some("Custom/1.0"));
        assert_eq!(c.timeout_secs, Some(10));
        assert_eq!(c.request_delay_secs, Some(1));
        assert_eq!(c.retry_count, Some(5));
        assert_eq!(
            c.retry_backoff_secs.as_deref(),
            Some([1, 2, 4, 8].as_slice())
        );
        assert_eq!(c.jobs, Some(8));
        assert_eq!(c.on_resource_error.as_deref(), Some("skip"));
        assert_eq!(c.author.as_deref(), Some("Me"));
        assert_eq!(c.language.as_deref(), Some("fr"));
        assert_eq!(c.ncx, Some(true));
    }

    #[test]
    fn parse_partial_config() {
        let c: Config = toml::from_str("jobs = 1").unwrap();
        assert_eq!(c.jobs, Some(1));
        assert!(c.on_resource_error.is_none());
    }

    #[test]
    fn invalid_toml_errors() {
        assert!(toml::from_str::<Config>("output_dir = [").is_err());
        assert!(toml::from_str::<Config>("jobs = \"many\"").is_err());
    }
}
