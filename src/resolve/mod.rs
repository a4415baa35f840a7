//! Resource resolution: fetch every external image the content references and rewrite the
//! references to container-local paths.

pub mod ids;
mod media;

pub use ids::{ResourceIds, RESOURCE_DIR};
pub use media::{guess_media_type, is_core_media_type};

use crate::fetch::{FetchError, FetchResponse, Fetcher};
use crate::model::ResourcePart;
use crate::tree::ContentTree;
use rayon::prelude::*;
use reqwest::Url;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Default number of concurrent resource fetches.
pub const DEFAULT_JOBS: usize = 4;

/// What to do when a resource cannot be fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResourceFailurePolicy {
    /// Fail the whole resolution on the first failing reference (default).
    #[default]
    Abort,
    /// Leave the reference pointing at its original URL, emit no part, and warn.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub policy: ResourceFailurePolicy,
    /// Maximum concurrent fetches. 1 fetches sequentially on the calling thread.
    pub jobs: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            policy: ResourceFailurePolicy::Abort,
            jobs: DEFAULT_JOBS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Could not fetch resource {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Could not start resource fetch workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Progress callback: (completed fetches, total fetches).
pub type Progress<'a> = &'a (dyn Fn(usize, usize) + Sync);

/// Makes a content tree self-contained by fetching and re-addressing its images.
pub struct ResourceResolver<'a> {
    fetcher: &'a dyn Fetcher,
    options: ResolveOptions,
    progress: Option<Progress<'a>>,
}

impl<'a> ResourceResolver<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, options: ResolveOptions) -> Self {
        Self {
            fetcher,
            options,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Progress<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Resolve every external image in `tree`, in document order.
    ///
    /// Identical URLs share one part. Ids and paths follow first-occurrence order no
    /// matter in which order fetches complete. Under [ResourceFailurePolicy::Abort] a
    /// failure leaves the tree untouched.
    pub fn resolve(&self, tree: &mut ContentTree) -> Result<Vec<ResourcePart>, ResolutionError> {
        let refs = tree.image_refs();
        let mut urls: Vec<String> = Vec::new();
        let mut slot_of: HashMap<String, usize> = HashMap::new();
        let mut ref_slots: Vec<Option<usize>> = Vec::with_capacity(refs.len());
        for image in &refs {
            let src = image.src();
            if !is_fetchable(&src) {
                log::debug!("leaving local reference as-is: {}", src);
                ref_slots.push(None);
                continue;
            }
            let slot = *slot_of.entry(src.clone()).or_insert_with(|| {
                urls.push(src.clone());
                urls.len() - 1
            });
            ref_slots.push(Some(slot));
        }
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        log::info!(
            "fetching {} resource(s) for {} reference(s)",
            urls.len(),
            refs.len()
        );

        let results = self.fetch_all(&urls)?;

        let mut ids = ResourceIds::new();
        let mut parts = Vec::new();
        let mut paths: Vec<Option<String>> = Vec::with_capacity(urls.len());
        for (url, result) in urls.iter().zip(results) {
            match result {
                Ok(response) => {
                    let part = make_part(&mut ids, url, response);
                    log::debug!("{} -> {} ({})", url, part.path, part.media_type);
                    paths.push(Some(part.path.clone()));
                    parts.push(part);
                }
                Err(source) => match self.options.policy {
                    ResourceFailurePolicy::Abort => {
                        return Err(ResolutionError::Fetch {
                            url: url.clone(),
                            source,
                        });
                    }
                    ResourceFailurePolicy::Skip => {
                        log::warn!("Skipping resource {}: {}", url, source);
                        paths.push(None);
                    }
                },
            }
        }

        for (image, slot) in refs.iter().zip(ref_slots) {
            if let Some(path) = slot.and_then(|s| paths[s].as_deref()) {
                image.set_src(path);
            }
        }
        Ok(parts)
    }

    /// Fetch each URL once. Result `i` belongs to `urls[i]`.
    fn fetch_all(
        &self,
        urls: &[String],
    ) -> Result<Vec<Result<FetchResponse, FetchError>>, ResolutionError> {
        let total = urls.len();
        let done = AtomicUsize::new(0);
        let fetch_one = |url: &String| {
            let result = self.fetcher.fetch(url);
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(progress) = self.progress {
                progress(n, total);
            }
            result
        };
        let jobs = self.options.jobs.max(1);
        if jobs == 1 || total == 1 {
            return Ok(urls.iter().map(fetch_one).collect());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.min(total))
            .build()?;
        Ok(pool.install(|| urls.par_iter().map(fetch_one).collect()))
    }
}

/// Distinct external image URLs `resolve` would fetch, in first-occurrence order.
pub fn external_image_urls(tree: &ContentTree) -> Vec<String> {
    let mut seen = HashSet::new();
    tree.image_refs()
        .iter()
        .map(|image| image.src())
        .filter(|src| is_fetchable(src) && seen.insert(src.clone()))
        .collect()
}

/// Only absolute http(s) URLs are fetched; relative paths and `data:` URIs stay as they are.
fn is_fetchable(src: &str) -> bool {
    Url::parse(src)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

fn make_part(ids: &mut ResourceIds, url: &str, response: FetchResponse) -> ResourcePart {
    let media_type = response
        .media_type()
        .filter(|mt| mt != "application/octet-stream")
        .unwrap_or_else(|| guess_media_type(url).to_string());
    if !is_core_media_type(&media_type) {
        log::warn!(
            "{} is {}, which EPUB readers are not required to display",
            url,
            media_type
        );
    }
    let id = ids.next_id();
    let path = ids.path_for(&id, url, &media_type);
    ResourcePart {
        id,
        path,
        media_type,
        data: response.data,
    }
}
