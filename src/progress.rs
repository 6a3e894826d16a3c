//! Progress hooks shared by the extraction and transfer phases.
use crate::transfer::{TransferFailure, TransferSuccess};
use tracing::{debug, info, warn};

/// Receives progress notifications. Every hook defaults to a no-op so callers
/// only implement what they render.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, _current: usize, _total: usize) {}

    fn on_batch_start(&self, _batch_index: usize, _total_batches: usize) {}

    fn on_batch_complete(&self, _batch_index: usize, _succeeded: usize, _failed: usize) {}

    fn on_item_success(&self, _success: &TransferSuccess) {}

    fn on_item_error(&self, _failure: &TransferFailure) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

/// Observer that reports through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingObserver {
    phase: &'static str,
}

impl LoggingObserver {
    pub fn new(phase: &'static str) -> Self {
        Self { phase }
    }
}

impl ProgressObserver for LoggingObserver {
    fn on_progress(&self, current: usize, total: usize) {
        debug!(phase = self.phase, current, total, "progress");
    }

    fn on_batch_start(&self, batch_index: usize, total_batches: usize) {
        info!(
            phase = self.phase,
            batch = batch_index + 1,
            total_batches,
            "batch started"
        );
    }

    fn on_batch_complete(&self, batch_index: usize, succeeded: usize, failed: usize) {
        info!(
            phase = self.phase,
            batch = batch_index + 1,
            succeeded,
            failed,
            "batch complete"
        );
    }

    fn on_item_success(&self, success: &TransferSuccess) {
        debug!(
            phase = self.phase,
            target = %success.target_name,
            bytes = success.payload.len(),
            "item transferred"
        );
    }

    fn on_item_error(&self, failure: &TransferFailure) {
        warn!(
            phase = self.phase,
            url = %failure.source_url,
            target = %failure.target_name,
            attempts = failure.attempts,
            reason = %failure.reason,
            "item failed"
        );
    }
}
