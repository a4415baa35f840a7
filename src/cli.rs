//! CLI parsing and orchestration. Parses args, merges config, runs page -> EPUB. Maps errors
//! to exit codes.

use crate::config::{self, Config};
use crate::epub::{EpubOptions, EpubVersion};
use crate::fetch::{FetchError, HttpFetcher};
use crate::pipeline::{
    Destination, Pipeline, PipelineError, PipelineOptions, DEFAULT_AUTHOR, DEFAULT_LANGUAGE,
};
use crate::resolve::{external_image_urls, ResolveOptions, ResourceFailurePolicy, DEFAULT_JOBS};
use crate::simplify::ReadabilitySimplifier;
use clap::Parser;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_DELAY_SECS: u64 = 0;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_COUNT: u32 = 3;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("{0}")]
    Validation(String),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Pipeline(PipelineError::Packaging(_)) => 3,
            CliRunError::Pipeline(_) => 2,
            CliRunError::Validation(_) => 3,
        }
    }
}

/// Run epubcheck on the given EPUB path. Requires epubcheck on PATH.
fn validate_epub(path: &Path) -> Result<(), CliRunError> {
    let output = std::process::Command::new("epubcheck")
        .arg(path)
        .output()
        .map_err(|e| {
            CliRunError::Validation(format!(
                "Could not run epubcheck: {}. Is epubcheck installed and on PATH?",
                e
            ))
        })?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let msg = if stderr.is_empty() { stdout } else { stderr };
        Err(CliRunError::Validation(format!(
            "epubcheck reported errors:\n{}",
            msg.trim()
        )))
    }
}

#[derive(Parser, Debug)]
#[command(name = "instakindle")]
#[command(about = "Turn a web article into a self-contained EPUB")]
#[command(
    after_help = "Config file keys (output_dir, user_agent, timeout_secs, request_delay_secs, retry_count, retry_backoff_secs, jobs, on_resource_error, author, language, ncx) are read from ./instakindle.toml or <config dir>/instakindle/config.toml. CLI flags override config."
)]
pub struct Args {
    /// Article URL (http or https).
    pub url: String,

    /// Output path. Default: ./{sanitized-title}.epub (or output_dir from config).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// What to do when an image cannot be downloaded: abort (default) or skip.
    #[arg(long, value_parser = parse_failure_policy)]
    pub on_resource_error: Option<ResourceFailurePolicy>,

    /// Concurrent image downloads (default 4; 1 downloads sequentially).
    #[arg(short, long, value_parser = parse_jobs)]
    pub jobs: Option<usize>,

    /// Author to record, overriding whatever the page declares.
    #[arg(long)]
    pub author: Option<String>,

    /// Language tag to record (e.g. en, fr-CA), overriding the page's.
    #[arg(long)]
    pub language: Option<String>,

    /// Generate EPUB 2 instead of EPUB 3.
    #[arg(long)]
    pub epub_2: bool,

    /// Include toc.ncx in EPUB 3 output for legacy readers (EPUB 2 always includes NCX).
    #[arg(long)]
    pub ncx: bool,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Minimum delay between requests in seconds (overrides config; default 0).
    #[arg(long)]
    pub delay: Option<u64>,

    /// Fetch and simplify the page, print title, image count and output path without writing.
    #[arg(long)]
    pub dry_run: bool,

    /// After writing, run epubcheck to validate the EPUB (epubcheck must be on PATH).
    #[arg(long)]
    pub validate: bool,

    /// Suppress progress output (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging and the full error chain.
    #[arg(long)]
    pub verbose: bool,
}

fn parse_failure_policy(s: &str) -> Result<ResourceFailurePolicy, String> {
    match s.trim().to_lowercase().as_str() {
        "abort" | "fail" => Ok(ResourceFailurePolicy::Abort),
        "skip" => Ok(ResourceFailurePolicy::Skip),
        _ => Err(format!(
            "Invalid --on-resource-error value: '{}'. Use abort or skip.",
            s
        )),
    }
}

fn parse_jobs(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(format!(
            "Invalid --jobs value: '{}'. Expected a whole number of at least 1.",
            s
        )),
    }
}

/// Only absolute http(s) URLs are accepted.
fn check_url(input: &str) -> Result<Url, CliRunError> {
    let url = Url::parse(input.trim()).map_err(|e| {
        CliRunError::InvalidInput(format!(
            "Expected an article URL. Example: https://example.com/post. Invalid: {}: {}",
            input, e
        ))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CliRunError::InvalidInput(format!(
            "Expected an http or https URL, got scheme '{}': {}",
            url.scheme(),
            input
        )));
    }
    Ok(url)
}

/// Ensure the output directory exists before any network work starts.
fn validate_destination(destination: &Destination) -> Result<(), CliRunError> {
    let dir = destination.directory();
    if !dir.as_os_str().is_empty() && !dir.is_dir() {
        return Err(CliRunError::InvalidInput(format!(
            "Cannot write output: {}: directory does not exist.",
            dir.display()
        )));
    }
    Ok(())
}

/// Merge CLI flags over config over built-in defaults.
fn pipeline_options(args: &Args, config: Option<&Config>) -> Result<PipelineOptions, CliRunError> {
    let policy = match args.on_resource_error {
        Some(p) => p,
        None => match config.and_then(|c| c.on_resource_error.as_deref()) {
            Some(s) => parse_failure_policy(s).map_err(|e| {
                CliRunError::InvalidInput(format!("Invalid config on_resource_error: {}", e))
            })?,
            None => ResourceFailurePolicy::default(),
        },
    };
    let jobs = args
        .jobs
        .or_else(|| config.and_then(|c| c.jobs))
        .unwrap_or(DEFAULT_JOBS);
    let jobs = if jobs == 0 {
        log::warn!("ignoring jobs = 0 from config; using 1");
        1
    } else {
        jobs
    };

    let version = if args.epub_2 {
        EpubVersion::Epub2
    } else {
        EpubVersion::Epub3
    };
    let include_ncx = args.ncx || config.and_then(|c| c.ncx).unwrap_or(false);

    Ok(PipelineOptions {
        resolve: ResolveOptions { policy, jobs },
        epub: EpubOptions {
            version,
            include_ncx,
        },
        author: args.author.clone(),
        language: args.language.clone(),
        fallback_author: config
            .and_then(|c| c.author.clone())
            .unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
        fallback_language: config
            .and_then(|c| c.language.clone())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
    })
}

fn build_fetcher(args: &Args, config: Option<&Config>) -> Result<HttpFetcher, CliRunError> {
    let delay_secs = args
        .delay
        .or_else(|| config.and_then(|c| c.request_delay_secs))
        .unwrap_or(DEFAULT_DELAY_SECS);
    let timeout_secs = args
        .timeout
        .or_else(|| config.and_then(|c| c.timeout_secs))
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let retry_count = config
        .and_then(|c| c.retry_count)
        .unwrap_or(DEFAULT_RETRY_COUNT)
        .max(1);
    let user_agent = args
        .user_agent
        .clone()
        .or_else(|| config.and_then(|c| c.user_agent.clone()));

    let mut builder = HttpFetcher::builder()
        .delay_secs(delay_secs)
        .timeout_secs(timeout_secs)
        .retry_count(retry_count);
    if let Some(backoff) = config.and_then(|c| c.retry_backoff_secs.clone()) {
        builder = builder.retry_backoff_secs(backoff);
    }
    if let Some(ua) = user_agent {
        builder = builder.user_agent(ua);
    }
    builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))
}

fn new_progress_bar(total: usize) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new(total as u64);
    if let Ok(style) =
        indicatif::ProgressStyle::default_bar().template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
    {
        bar.set_style(
            style
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );
    }
    bar.set_message("Downloading images");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let url = check_url(&args.url)?;

    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let config = config.as_ref();

    let destination = match &args.output {
        Some(p) => Destination::File(p.clone()),
        None => Destination::Directory(
            config
                .and_then(|c| c.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from(".")),
        ),
    };
    validate_destination(&destination)?;
    let options = pipeline_options(args, config)?;
    let fetcher = build_fetcher(args, config)?;
    let simplifier = ReadabilitySimplifier;

    let bar: OnceLock<indicatif::ProgressBar> = OnceLock::new();
    let progress_cb = |done: usize, total: usize| {
        if total == 0 {
            return;
        }
        let pb = bar.get_or_init(|| new_progress_bar(total));
        pb.set_position(done as u64);
    };

    let mut pipeline = Pipeline::new(&fetcher, &simplifier, options);
    if !args.quiet {
        pipeline = pipeline.with_progress(&progress_cb);
    }

    if args.dry_run {
        let (document, _) = pipeline.extract(url.as_str()).map_err(map_pipeline_error)?;
        let output_path = destination.path_for(&document.title);
        eprintln!("Title: {}", document.title);
        eprintln!("Images: {}", external_image_urls(&document.content).len());
        eprintln!("Output: {}", output_path.display());
        return Ok(());
    }

    let written = pipeline.run(url.as_str(), &destination);
    if let Some(pb) = bar.get() {
        pb.disable_steady_tick();
        pb.finish_and_clear();
    }
    let output_path = written.map_err(map_pipeline_error)?;

    if args.validate {
        validate_epub(&output_path)?;
    }
    if !args.quiet {
        eprintln!("Wrote {}", output_path.display());
    }
    Ok(())
}

/// A malformed page URL is the user's input, not a fetch failure.
fn map_pipeline_error(e: PipelineError) -> CliRunError {
    match e {
        PipelineError::Fetch(FetchError::InvalidUrl { input, reason }) => {
            CliRunError::InvalidInput(format!("Invalid URL: {}: {}", input, reason))
        }
        e => CliRunError::Pipeline(e),
    }
}
