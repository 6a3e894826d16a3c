//! Walks a post listing page by page and collects the images it finds.
use crate::extract::extract_media;
use crate::model::{MediaItem, PostPage};
use crate::pagination::{
    PageOutcome, PageRequest, PaginationError, PaginationState, MAX_PAGE_LIMIT,
};
use crate::progress::ProgressObserver;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Errors a post listing can fail with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("not authorized to list posts: {message}")]
    Authorization { message: String },
    #[error("rate limited by upstream: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },
    #[error("upstream error {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("failed to reach upstream: {0}")]
    Transport(String),
    #[error("invalid upstream response: {0}")]
    Decode(String),
}

/// Source of post pages, e.g. the Tumblr likes endpoint.
#[async_trait]
pub trait PostSource: Send + Sync {
    async fn fetch_page(
        &self,
        identifier: &str,
        request: &PageRequest,
    ) -> Result<PostPage, FetchError>;
}

/// What to do with images past `target_count` on the final page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OvershootPolicy {
    /// Keep the whole final page.
    #[default]
    KeepPage,
    /// Cut the result to exactly `target_count`. The cut images are kept in
    /// [`Accumulation::overflow`] so a resumed walk can deliver them.
    Truncate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulatorOptions {
    pub target_count: usize,
    pub page_limit: u32,
    pub max_iterations: usize,
    pub max_items: usize,
    pub overshoot: OvershootPolicy,
}

impl Default for AccumulatorOptions {
    fn default() -> Self {
        Self {
            target_count: 50,
            page_limit: MAX_PAGE_LIMIT,
            max_iterations: 500,
            max_items: 10_000,
            overshoot: OvershootPolicy::KeepPage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    /// The listing has no more pages.
    Exhausted,
    SafetyCap,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Accumulation {
    pub items: Vec<MediaItem>,
    /// Images past `target_count` cut by [`OvershootPolicy::Truncate`]. `state`
    /// already points past them.
    pub overflow: Vec<MediaItem>,
    pub state: PaginationState,
    pub total_source_count: Option<u64>,
    pub stop: StopReason,
    pub pages_fetched: usize,
}

#[derive(Debug, Error)]
pub enum AccumulateError {
    #[error("listing interrupted after {} images: {source}", .partial.items.len())]
    Interrupted {
        partial: Box<Accumulation>,
        #[source]
        source: FetchError,
    },
    #[error(transparent)]
    InvalidPagination(#[from] PaginationError),
}

impl AccumulateError {
    /// Whatever was collected before the failure, if anything.
    pub fn partial(&self) -> Option<&Accumulation> {
        match self {
            AccumulateError::Interrupted { partial, .. } => Some(&**partial),
            AccumulateError::InvalidPagination(_) => None,
        }
    }
}

pub struct ImageAccumulator<'a, S: ?Sized> {
    source: &'a S,
    options: AccumulatorOptions,
}

impl<'a, S: PostSource + ?Sized> ImageAccumulator<'a, S> {
    pub fn new(source: &'a S, options: AccumulatorOptions) -> Self {
        Self { source, options }
    }

    pub fn options(&self) -> &AccumulatorOptions {
        &self.options
    }

    /// Collect images for `identifier` starting from `start`.
    ///
    /// A fetch failure returns [`AccumulateError::Interrupted`] carrying the
    /// items and pagination state gathered up to that point.
    pub async fn run(
        &self,
        identifier: &str,
        start: PaginationState,
        cancel: &CancellationToken,
        observer: &dyn ProgressObserver,
    ) -> Result<Accumulation, AccumulateError> {
        self.run_from(identifier, start, Vec::new(), cancel, observer)
            .await
    }

    /// Like [`run`](Self::run), but delivers `pending` (the overflow of an
    /// earlier truncated walk) before anything fetched from `start`.
    #[instrument(skip_all, fields(identifier = %identifier, pending = pending.len()))]
    pub async fn run_from(
        &self,
        identifier: &str,
        start: PaginationState,
        pending: Vec<MediaItem>,
        cancel: &CancellationToken,
        observer: &dyn ProgressObserver,
    ) -> Result<Accumulation, AccumulateError> {
        let opts = &self.options;
        if opts.target_count == 0 {
            return Err(PaginationError::InvalidPagination("target count must be positive").into());
        }

        let mut acc = Accumulation {
            items: pending,
            overflow: Vec::new(),
            state: start,
            total_source_count: start.total_count(),
            stop: StopReason::Exhausted,
            pages_fetched: 0,
        };

        loop {
            if acc.items.len() >= opts.target_count {
                acc.stop = StopReason::TargetReached;
                break;
            }
            if !acc.state.has_more() {
                acc.stop = StopReason::Exhausted;
                break;
            }
            if acc.pages_fetched >= opts.max_iterations || acc.items.len() >= opts.max_items {
                warn!(
                    pages = acc.pages_fetched,
                    items = acc.items.len(),
                    "safety cap reached; stopping"
                );
                acc.stop = StopReason::SafetyCap;
                break;
            }
            if cancel.is_cancelled() {
                acc.stop = StopReason::Cancelled;
                break;
            }

            let request = acc.state.next_request(opts.page_limit);
            debug!(?request, "fetching page");
            let page = match self.source.fetch_page(identifier, &request).await {
                Ok(page) => page,
                Err(source) => {
                    warn!(error = %source, collected = acc.items.len(), "page fetch failed");
                    return Err(AccumulateError::Interrupted {
                        partial: Box::new(acc),
                        source,
                    });
                }
            };
            acc.pages_fetched += 1;

            let outcome = PageOutcome {
                item_count: page.posts.len(),
                last_item_timestamp: page.posts.last().map(|p| p.cursor_timestamp()),
                total_count: page.total_count,
            };
            for post in &page.posts {
                acc.items.extend(extract_media(post));
            }
            acc.state = acc.state.advance(request.limit, outcome);
            if acc.total_source_count.is_none() {
                acc.total_source_count = acc.state.total_count();
            }
            observer.on_progress(acc.items.len(), opts.target_count);

            if page.posts.is_empty() {
                acc.stop = StopReason::Exhausted;
                break;
            }
        }

        if opts.overshoot == OvershootPolicy::Truncate && acc.items.len() > opts.target_count {
            acc.overflow = acc.items.split_off(opts.target_count);
        }
        info!(
            items = acc.items.len(),
            overflow = acc.overflow.len(),
            pages = acc.pages_fetched,
            stop = ?acc.stop,
            mode = ?acc.state.mode(),
            "image collection finished"
        );
        Ok(acc)
    }
}
