//! instakindle: fetch a web article, reduce it to its readable content, download its images,
//! and package everything as a self-contained EPUB.

pub mod cli;
pub mod config;
pub mod epub;
pub mod fetch;
pub mod model;
pub mod pipeline;
pub mod resolve;
pub mod simplify;
pub mod tree;

// Re-exports for CLI and consumers.
pub use epub::{build_epub, write_epub, EpubOptions, EpubVersion, PackagingError};
pub use fetch::{FetchError, FetchResponse, Fetcher, HttpFetcher, HttpFetcherBuilder};
pub use model::{Book, Chapter, Document, ResourcePart, TocEntry};
pub use pipeline::{Destination, Pipeline, PipelineError, PipelineOptions};
pub use resolve::{
    ResolutionError, ResolveOptions, ResourceFailurePolicy, ResourceResolver,
};
pub use simplify::{ExtractionError, ReadabilitySimplifier, Simplifier};
pub use tree::ContentTree;
