//! Bounded single-worker propagation queue.
//!
//! Every routed change becomes one [`Operation`] (a group of targets). A
//! single tokio task drains the queue and applies operations in submission
//! order. A failing target is logged and dropped; nothing is retried and
//! nothing blocks the operations behind it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use searchsync_core::PropagationTarget;
use searchsync_index::SearchBackend;

use crate::apply::apply_group;
use crate::error::SyncError;

/// The targets routed from one mutation, applied together and in order.
#[derive(Debug, Clone)]
pub struct Operation {
    pub label: String,
    pub targets: Vec<PropagationTarget>,
}

impl Operation {
    pub fn new(label: impl Into<String>, targets: Vec<PropagationTarget>) -> Self {
        Operation {
            label: label.into(),
            targets,
        }
    }
}

enum Message {
    Apply(Operation),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

#[derive(Debug, Default)]
struct Counters {
    operations: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of the queue's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Operations the worker has finished.
    pub operations: u64,
    /// Targets applied successfully.
    pub applied: u64,
    /// Targets that failed and were dropped.
    pub failed: u64,
    /// Operations turned away at submission.
    pub dropped: u64,
}

pub struct SyncQueue {
    tx: mpsc::Sender<Message>,
    counters: Arc<Counters>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncQueue {
    /// Spawn the worker. Must be called within a tokio runtime.
    pub fn start(backend: Arc<dyn SearchBackend>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(run(backend, rx, Arc::clone(&counters)));
        tracing::info!(capacity, "propagation queue started");
        SyncQueue {
            tx,
            counters,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue, waiting for room if the queue is full. Write paths use
    /// [`SyncQueue::try_submit`] so a stalled backend never holds them up.
    pub async fn submit(&self, op: Operation) -> Result<(), SyncError> {
        if op.targets.is_empty() {
            return Ok(());
        }
        self.tx.send(Message::Apply(op)).await.map_err(|_| {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            SyncError::QueueClosed
        })
    }

    /// Enqueue without waiting; fails with `QueueFull` at capacity.
    pub fn try_submit(&self, op: Operation) -> Result<(), SyncError> {
        if op.targets.is_empty() {
            return Ok(());
        }
        self.tx.try_send(Message::Apply(op)).map_err(|e| {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => SyncError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SyncError::QueueClosed,
            }
        })
    }

    /// Wait until everything submitted before this call has been applied.
    pub async fn flush(&self) -> Result<(), SyncError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Message::Flush(done_tx))
            .await
            .map_err(|_| SyncError::QueueClosed)?;
        done_rx.await.map_err(|_| SyncError::QueueClosed)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            operations: self.counters.operations.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Drain what is already queued, then stop the worker. Later submissions
    /// fail with `QueueClosed`.
    pub async fn shutdown(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        if self.tx.send(Message::Shutdown).await.is_ok() {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "propagation worker panicked");
            }
        }
        tracing::info!(stats = ?self.stats(), "propagation queue stopped");
    }
}

async fn run(
    backend: Arc<dyn SearchBackend>,
    mut rx: mpsc::Receiver<Message>,
    counters: Arc<Counters>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Apply(op) => {
                let report = apply_group(backend.as_ref(), &op.targets, &op.label).await;
                counters.operations.fetch_add(1, Ordering::Relaxed);
                counters
                    .applied
                    .fetch_add(report.applied as u64, Ordering::Relaxed);
                counters
                    .failed
                    .fetch_add(report.failed as u64, Ordering::Relaxed);
                if report.failed > 0 {
                    tracing::warn!(
                        label = %op.label,
                        applied = report.applied,
                        failed = report.failed,
                        "operation partially applied"
                    );
                } else {
                    tracing::debug!(label = %op.label, applied = report.applied, "operation applied");
                }
            }
            Message::Flush(done) => {
                let _ = done.send(());
            }
            Message::Shutdown => break,
        }
    }
}
