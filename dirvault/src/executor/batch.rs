//! Batch runner with per-item failure isolation.
//!
//! A failing item is logged and pushed onto a failure channel; the rest of
//! the batch keeps going. The channel is drained once the batch is over.
//! Cancellation is checked before every item.

use crate::engine::Engine;
use crate::progress::{format_duration, BatchProgress};
use crate::utils::Result;
use crossbeam_channel::Sender;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    /// Relative path of the directory (or container) that failed
    pub item: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub action: String,
    pub total: usize,
    pub completed: usize,
    pub failures: Vec<ItemFailure>,
    /// Some items were skipped because cancellation was requested
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn error_count(&self) -> usize {
        self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    /// Items never attempted
    pub fn skipped(&self) -> usize {
        self.total - self.completed - self.failures.len()
    }
}

fn run_item<T, L, O>(
    action: &'static str,
    item: &T,
    label: &L,
    op: &O,
    failures: &Sender<ItemFailure>,
    completed: &AtomicUsize,
    progress: &BatchProgress,
) where
    L: Fn(&T) -> String,
    O: Fn(&T) -> Result<()>,
{
    let name = label(item);
    match op(item) {
        Ok(()) => {
            completed.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            error!(action, item = %name, error = %e, "Item failed");
            let _ = failures.send(ItemFailure {
                item: name.clone(),
                error: e.to_string(),
            });
        }
    }
    progress.item_done(&name);
}

fn finish(
    engine: &Engine,
    action: &'static str,
    total: usize,
    completed: usize,
    mut failures: Vec<ItemFailure>,
    progress: &BatchProgress,
) -> BatchOutcome {
    failures.sort_by(|a, b| a.item.cmp(&b.item));
    let cancelled = engine.is_cancelled() && completed + failures.len() < total;

    if cancelled {
        warn!(action, completed, total, "Batch cancelled");
    }
    info!(
        action,
        completed,
        failed = failures.len(),
        attempted = progress.processed(),
        total,
        elapsed = %format_duration(progress.elapsed().as_secs()),
        "Batch finished"
    );

    BatchOutcome {
        action: action.to_string(),
        total,
        completed,
        failures,
        cancelled,
    }
}

/// Run `op` over `items` on the engine's worker pool
pub fn run_parallel<T: Sync>(
    engine: &Engine,
    action: &'static str,
    items: &[T],
    label: impl Fn(&T) -> String + Sync,
    op: impl Fn(&T) -> Result<()> + Sync,
) -> BatchOutcome {
    info!(action, total = items.len(), "Starting batch");
    let progress = BatchProgress::new(action, items.len());
    let completed = AtomicUsize::new(0);
    let (tx, rx) = crossbeam_channel::unbounded();

    engine.install(|| {
        items.par_iter().for_each_with(tx, |tx, item| {
            if engine.is_cancelled() {
                return;
            }
            run_item(action, item, &label, &op, tx, &completed, &progress);
        });
    });

    let failures: Vec<ItemFailure> = rx.try_iter().collect();
    finish(
        engine,
        action,
        items.len(),
        completed.into_inner(),
        failures,
        &progress,
    )
}

/// Run `op` over `items` one at a time, in order
pub fn run_sequential<T>(
    engine: &Engine,
    action: &'static str,
    items: &[T],
    label: impl Fn(&T) -> String,
    op: impl Fn(&T) -> Result<()>,
) -> BatchOutcome {
    info!(action, total = items.len(), "Starting batch");
    let progress = BatchProgress::new(action, items.len());
    let completed = AtomicUsize::new(0);
    let (tx, rx) = crossbeam_channel::unbounded();

    for item in items {
        if engine.is_cancelled() {
            break;
        }
        run_item(action, item, &label, &op, &tx, &completed, &progress);
    }
    drop(tx);

    let failures: Vec<ItemFailure> = rx.try_iter().collect();
    finish(
        engine,
        action,
        items.len(),
        completed.into_inner(),
        failures,
        &progress,
    )
}
