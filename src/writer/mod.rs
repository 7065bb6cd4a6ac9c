//! # Write-Behind Worker
//!
//! Mutations are acknowledged to clients once they hit the shared store;
//! durability happens here, afterwards. A bounded queue feeds one consumer
//! task that resolves each operation to a repository call. Failures never
//! reach clients: they are counted and logged with their payload.
//!
//! A full queue fails fast on enqueue (`queue_overflow`) rather than
//! blocking a handler; the in-memory and shared tiers stay consistent and
//! the operator reacts to the counter.

use crate::error::Result;
use crate::metrics::Metrics;
use crate::model::{ItemId, ListId, TodoItem};
use crate::repository::DurableStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// One pending durable write.
///
/// Only item mutations ride the queue; list creation, list deletion, and
/// membership upserts are synchronous in the coordinator because their
/// results gate the reply.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Persist a new item
    AddItem(TodoItem),
    /// Persist the full snapshot of a mutated item
    UpdateItem(TodoItem),
    /// Soft-delete an item
    DeleteItem { list_id: ListId, item_id: ItemId },
}

impl WriteOp {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            WriteOp::AddItem(_) => "add_item",
            WriteOp::UpdateItem(_) => "update_item",
            WriteOp::DeleteItem { .. } => "delete_item",
        }
    }
}

/// Producer side of the write queue. Cheap to clone.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriteOp>,
    shutdown: watch::Sender<bool>,
    running: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
}

impl WriterHandle {
    /// Enqueue a durable write. Never blocks: when the queue is full the
    /// op is dropped, the overflow counter bumps, and the caller proceeds.
    pub fn enqueue(&self, op: WriteOp) {
        match self.tx.try_send(op) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(op)) => {
                Metrics::incr(&self.metrics.queue_overflow);
                log::warn!(
                    "write queue full, dropping {} (durable tier will lag until rebuild)",
                    op.label()
                );
            }
            Err(mpsc::error::TrySendError::Closed(op)) => {
                log::warn!("write worker stopped, dropping {}", op.label());
            }
        }
    }

    /// Current queue depth.
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// True once the consumer task is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Signal shutdown; the worker drains for its configured window.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Spawn the consumer task. Returns the producer handle and the task's
/// join handle so shutdown can await the drain.
pub fn spawn(
    repo: Arc<dyn DurableStore>,
    metrics: Arc<Metrics>,
    queue_size: usize,
    drain_window: Duration,
) -> (WriterHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(queue_size.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = Arc::new(AtomicBool::new(false));

    let worker = WriteWorker {
        rx,
        repo,
        metrics: metrics.clone(),
        shutdown: shutdown_rx,
        drain_window,
        running: running.clone(),
    };
    let join = tokio::spawn(worker.run());

    (
        WriterHandle {
            tx,
            shutdown: shutdown_tx,
            running,
            metrics,
        },
        join,
    )
}

struct WriteWorker {
    rx: mpsc::Receiver<WriteOp>,
    repo: Arc<dyn DurableStore>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
    drain_window: Duration,
    running: Arc<AtomicBool>,
}

impl WriteWorker {
    async fn run(mut self) {
        self.running.store(true, Ordering::Relaxed);
        log::info!("write worker started");

        loop {
            tokio::select! {
                op = self.rx.recv() => match op {
                    Some(op) => self.process(op).await,
                    None => break,
                },
                _ = self.shutdown.changed() => {
                    self.drain().await;
                    break;
                }
            }
        }

        self.running.store(false, Ordering::Relaxed);
        log::info!("write worker stopped");
    }

    /// Process whatever is already queued, bounded by the drain window.
    async fn drain(&mut self) {
        let deadline = Instant::now() + self.drain_window;
        while Instant::now() < deadline {
            match self.rx.try_recv() {
                Ok(op) => self.process(op).await,
                Err(_) => return,
            }
        }

        let mut dropped = 0u64;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            Metrics::add(&self.metrics.writes_dropped_on_shutdown, dropped);
            log::warn!("shutdown drain window elapsed, {} writes dropped", dropped);
        }
    }

    async fn process(&self, op: WriteOp) {
        let label = op.label();
        let started = Instant::now();
        let result = self.apply(&op).await;
        let elapsed = started.elapsed();
        Metrics::add(&self.metrics.write_micros_total, elapsed.as_micros() as u64);

        match result {
            Ok(()) => {
                Metrics::incr(&self.metrics.writes_processed);
                log::debug!("persisted {} in {:?}", label, elapsed);
            }
            Err(err) => {
                Metrics::incr(&self.metrics.writes_failed);
                log::error!("durable write {} failed: {} (payload: {:?})", label, err, op);
            }
        }
    }

    async fn apply(&self, op: &WriteOp) -> Result<()> {
        match op {
            WriteOp::AddItem(item) => self.repo.add_item(item).await,
            WriteOp::UpdateItem(item) => self.repo.update_item(item).await,
            WriteOp::DeleteItem { list_id, item_id } => {
                self.repo.soft_delete_item(*list_id, *item_id).await
            }
        }
    }
}
