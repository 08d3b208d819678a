use crate::summarizer::Summarizer;
use crate::types::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Single-flight wrapper around the summarizer batch.
///
/// Only one batch runs per process at a time. Scheduled sweeps skip while one
/// is in flight; manual triggers fail with `AlreadyProcessing`.
pub struct ProcessingScheduler {
    summarizer: Arc<Summarizer>,
    running: AtomicBool,
    batch_size: usize,
}

/// Clears the in-flight flag when the batch ends, including on panic or error.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ProcessingScheduler {
    pub fn new(summarizer: Arc<Summarizer>, batch_size: usize) -> Self {
        Self {
            summarizer,
            running: AtomicBool::new(false),
            batch_size,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn try_acquire(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard(&self.running))
    }

    /// Timer entry point. Returns `None` when a batch was already running.
    pub async fn run_cycle(&self) -> Option<usize> {
        let Some(_guard) = self.try_acquire() else {
            info!("Processing already in progress, skipping");
            return None;
        };

        info!("Starting processing cycle");
        match self.summarizer.process_batch(self.batch_size).await {
            Ok(processed) => {
                info!("Processing cycle complete: {} items processed", processed);
                Some(processed)
            }
            Err(e) => {
                error!("Processing cycle failed: {}", e);
                Some(0)
            }
        }
    }

    /// Manual entry point.
    pub async fn trigger(&self, limit: Option<usize>) -> Result<usize> {
        let _guard = self.try_acquire().ok_or(Error::AlreadyProcessing)?;
        self.summarizer.process_batch(limit.unwrap_or(self.batch_size)).await
    }
}
