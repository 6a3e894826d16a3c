//! Throttled, sequential transfer of remote files.
//!
//! Items are fetched strictly one at a time, in input order, split into
//! batches separated by a cooldown. Failed fetches are retried with a fixed
//! delay. Cancellation is cooperative: the token is polled at the start of
//! each batch and before each item, so an in-flight fetch always completes.
use crate::model::TransferItem;
use crate::progress::ProgressObserver;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub mod http;
pub mod sink;

pub use http::HttpFetcher;
pub use sink::DirectorySink;

/// Fetches the bytes behind a URL.
#[async_trait]
pub trait TransferSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, String>;
}

/// Stores a fetched payload under a name.
#[async_trait]
pub trait TransferSink: Send + Sync {
    async fn persist(&self, name: &str, bytes: &[u8]) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    pub batch_size: usize,
    pub delay_between_batches: Duration,
    pub delay_between_items: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            batch_size: 20,
            delay_between_batches: Duration::from_millis(1000),
            delay_between_items: Duration::from_millis(75),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferSuccess {
    pub index: usize,
    pub source_url: String,
    pub target_name: String,
    pub payload: Bytes,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferFailure {
    pub index: usize,
    pub batch_index: usize,
    pub source_url: String,
    pub target_name: String,
    pub reason: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TransferRunResult {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<TransferFailure>,
    pub cancelled: bool,
    pub payloads: Vec<TransferSuccess>,
}

impl TransferRunResult {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistFailure {
    pub index: usize,
    pub target_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct PersistRunResult {
    pub saved: usize,
    pub failed: usize,
    pub errors: Vec<PersistFailure>,
    pub cancelled: bool,
}

pub struct BatchTransferEngine<S> {
    source: S,
    options: TransferOptions,
}

impl<S: TransferSource> BatchTransferEngine<S> {
    pub fn new(source: S, options: TransferOptions) -> Self {
        Self { source, options }
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch every item. Failures are recorded, never fatal; only `cancel`
    /// ends the run early.
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn run(
        &self,
        items: Vec<TransferItem>,
        cancel: &CancellationToken,
        observer: &dyn ProgressObserver,
    ) -> TransferRunResult {
        let total = items.len();
        let batch_size = self.options.batch_size.max(1);
        let total_batches = total.div_ceil(batch_size);
        let mut result = TransferRunResult::default();
        let mut items = items.into_iter().enumerate();

        for batch_index in 0..total_batches {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            observer.on_batch_start(batch_index, total_batches);
            let (mut batch_ok, mut batch_failed) = (0, 0);
            let batch: Vec<(usize, TransferItem)> = items.by_ref().take(batch_size).collect();
            let batch_len = batch.len();

            for (position, (index, item)) in batch.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    result.cancelled = true;
                    break;
                }

                match self.fetch_with_retry(&item.source_url).await {
                    Ok(payload) => {
                        let success = TransferSuccess {
                            index,
                            source_url: item.source_url,
                            target_name: item.target_name,
                            payload,
                            metadata: item.metadata,
                        };
                        observer.on_item_success(&success);
                        result.payloads.push(success);
                        result.succeeded += 1;
                        batch_ok += 1;
                    }
                    Err((reason, attempts)) => {
                        let failure = TransferFailure {
                            index,
                            batch_index,
                            source_url: item.source_url,
                            target_name: item.target_name,
                            reason,
                            attempts,
                        };
                        observer.on_item_error(&failure);
                        result.errors.push(failure);
                        result.failed += 1;
                        batch_failed += 1;
                    }
                }
                observer.on_progress(result.attempted(), total);

                if position + 1 < batch_len {
                    pause(self.options.delay_between_items, cancel).await;
                }
            }

            observer.on_batch_complete(batch_index, batch_ok, batch_failed);
            if result.cancelled {
                break;
            }
            if batch_index + 1 < total_batches {
                pause(self.options.delay_between_batches, cancel).await;
            }
        }

        if result.cancelled {
            info!(
                succeeded = result.succeeded,
                failed = result.failed,
                total,
                "transfer cancelled"
            );
        } else {
            info!(
                succeeded = result.succeeded,
                failed = result.failed,
                "transfer finished"
            );
        }
        result
    }

    /// One initial attempt plus up to `max_retries` retries, `retry_delay` apart.
    async fn fetch_with_retry(&self, url: &str) -> Result<Bytes, (String, u32)> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.source.fetch(url).await {
                Ok(bytes) => {
                    if attempts > 1 {
                        debug!(url, attempts, "fetch succeeded after retry");
                    }
                    return Ok(bytes);
                }
                Err(reason) if attempts > self.options.max_retries => {
                    return Err((reason, attempts));
                }
                Err(reason) => {
                    warn!(url, attempts, error = %reason, "fetch failed, retrying");
                    if !self.options.retry_delay.is_zero() {
                        tokio::time::sleep(self.options.retry_delay).await;
                    }
                }
            }
        }
    }
}

/// Write payloads to `sink` one at a time. A failed write is recorded and the
/// run moves on; nothing is retried.
#[instrument(skip_all, fields(payloads = payloads.len()))]
pub async fn persist_all<K: TransferSink + ?Sized>(
    sink: &K,
    payloads: &[TransferSuccess],
    delay_between_items: Duration,
    cancel: &CancellationToken,
    observer: &dyn ProgressObserver,
) -> PersistRunResult {
    let total = payloads.len();
    let mut result = PersistRunResult::default();

    for (position, payload) in payloads.iter().enumerate() {
        if cancel.is_cancelled() {
            result.cancelled = true;
            break;
        }
        match sink.persist(&payload.target_name, &payload.payload).await {
            Ok(()) => result.saved += 1,
            Err(reason) => {
                warn!(target = %payload.target_name, error = %reason, "failed to persist");
                result.errors.push(PersistFailure {
                    index: payload.index,
                    target_name: payload.target_name.clone(),
                    reason,
                });
                result.failed += 1;
            }
        }
        observer.on_progress(result.saved + result.failed, total);

        if position + 1 < total {
            pause(delay_between_items, cancel).await;
        }
    }

    info!(
        saved = result.saved,
        failed = result.failed,
        cancelled = result.cancelled,
        "persist finished"
    );
    result
}

/// Download `items` and write them to `sink` one batch at a time, so at most
/// `batch_size` payloads are held in memory. Batches are still separated by
/// `delay_between_batches`. Indices in both results refer to `items`; the
/// returned `TransferRunResult` carries no payloads.
#[instrument(skip_all, fields(items = items.len()))]
pub async fn download_to<S, K>(
    engine: &BatchTransferEngine<S>,
    sink: &K,
    items: Vec<TransferItem>,
    cancel: &CancellationToken,
    download_observer: &dyn ProgressObserver,
    save_observer: &dyn ProgressObserver,
) -> (TransferRunResult, PersistRunResult)
where
    S: TransferSource,
    K: TransferSink + ?Sized,
{
    let total = items.len();
    let options = *engine.options();
    let batch_size = options.batch_size.max(1);
    let total_batches = total.div_ceil(batch_size);
    let mut downloaded = TransferRunResult::default();
    let mut saved = PersistRunResult::default();
    let mut items = items.into_iter();

    for batch_index in 0..total_batches {
        if cancel.is_cancelled() {
            downloaded.cancelled = true;
            break;
        }
        let offset = batch_index * batch_size;
        let chunk: Vec<TransferItem> = items.by_ref().take(batch_size).collect();

        let view = BatchView {
            inner: download_observer,
            batch_index,
            total_batches,
            offset,
            done: downloaded.attempted(),
            total,
        };
        let mut run = engine.run(chunk, cancel, &view).await;
        for payload in &mut run.payloads {
            payload.index += offset;
        }
        let view = BatchView {
            inner: save_observer,
            batch_index,
            total_batches,
            offset,
            done: saved.saved + saved.failed,
            total,
        };
        let written =
            persist_all(sink, &run.payloads, options.delay_between_items, cancel, &view).await;

        downloaded.succeeded += run.succeeded;
        downloaded.failed += run.failed;
        downloaded.cancelled |= run.cancelled;
        downloaded
            .errors
            .extend(run.errors.into_iter().map(|mut failure| {
                failure.index += offset;
                failure.batch_index = batch_index;
                failure
            }));
        saved.saved += written.saved;
        saved.failed += written.failed;
        saved.cancelled |= written.cancelled;
        saved.errors.extend(written.errors);

        if downloaded.cancelled || saved.cancelled {
            break;
        }
        if batch_index + 1 < total_batches {
            pause(options.delay_between_batches, cancel).await;
        }
    }
    (downloaded, saved)
}

/// Maps the hooks of a single-batch engine run onto the position of that
/// batch in the whole run.
struct BatchView<'a> {
    inner: &'a dyn ProgressObserver,
    batch_index: usize,
    total_batches: usize,
    offset: usize,
    done: usize,
    total: usize,
}

impl ProgressObserver for BatchView<'_> {
    fn on_progress(&self, current: usize, _total: usize) {
        self.inner.on_progress(self.done + current, self.total);
    }

    fn on_batch_start(&self, _batch_index: usize, _total_batches: usize) {
        self.inner.on_batch_start(self.batch_index, self.total_batches);
    }

    fn on_batch_complete(&self, _batch_index: usize, succeeded: usize, failed: usize) {
        self.inner
            .on_batch_complete(self.batch_index, succeeded, failed);
    }

    fn on_item_success(&self, success: &TransferSuccess) {
        let mut success = success.clone();
        success.index += self.offset;
        self.inner.on_item_success(&success);
    }

    fn on_item_error(&self, failure: &TransferFailure) {
        let mut failure = failure.clone();
        failure.index += self.offset;
        failure.batch_index = self.batch_index;
        self.inner.on_item_error(&failure);
    }
}

/// Sleep for `delay`, waking early if the run is cancelled.
async fn pause(delay: Duration, cancel: &CancellationToken) {
    if delay.is_zero() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = cancel.cancelled() => {}
    }
}
