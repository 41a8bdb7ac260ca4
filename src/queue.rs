//! Channel queue manager — the per-channel serialization engine.
//!
//! One unbounded FIFO queue and one worker task per channel. Within a
//! channel, events run strictly one at a time through the fixed pipeline
//! (enhance, then clean — the second stage is unconditional); across
//! channels, workers run fully in parallel. A stalled channel never blocks
//! another.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::Utc;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConfigHandle;
use crate::gateway::Gateway;
use crate::pipeline::types::{ChannelId, EventReport, MessageEvent};
use crate::pipeline::{CleanerPipeline, EnhancerPipeline};
use crate::store::DuplicateIndex;

/// Capacity of the report broadcast ring.
const REPORT_CAPACITY: usize = 256;

/// Dependencies shared by every channel worker.
#[derive(Clone)]
pub struct WorkerDeps {
    pub gateway: Arc<dyn Gateway>,
    pub index: Arc<dyn DuplicateIndex>,
    pub config: ConfigHandle,
}

/// Submission rejected: the manager is shutting down. A logged, expected
/// data-loss boundary, not a fault.
#[derive(Debug, thiserror::Error)]
#[error("queue manager is shutting down; event for {channel} dropped")]
pub struct SubmitError {
    pub channel: ChannelId,
}

/// One channel's queue handle.
struct ChannelWorker {
    tx: mpsc::UnboundedSender<MessageEvent>,
    /// Pending (not yet dequeued) event count, for the depth alarm.
    depth: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

/// Owns every per-channel queue and worker.
pub struct QueueManager {
    deps: WorkerDeps,
    workers: RwLock<HashMap<ChannelId, ChannelWorker>>,
    report_tx: broadcast::Sender<EventReport>,
    accepting: AtomicBool,
}

impl QueueManager {
    pub fn new(deps: WorkerDeps) -> Self {
        let (report_tx, _) = broadcast::channel(REPORT_CAPACITY);
        Self {
            deps,
            workers: RwLock::new(HashMap::new()),
            report_tx,
            accepting: AtomicBool::new(true),
        }
    }

    /// Subscribe to the terminal report for every processed event.
    pub fn subscribe(&self) -> broadcast::Receiver<EventReport> {
        self.report_tx.subscribe()
    }

    /// Enqueue an event onto its channel's queue, in arrival order.
    ///
    /// Never blocks: queues are unbounded and the worker is spawned lazily
    /// on the channel's first event.
    pub async fn submit(&self, event: MessageEvent) -> Result<(), SubmitError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SubmitError {
                channel: event.channel,
            });
        }

        let alarm_depth = self.deps.config.snapshot().await.config.queue_alarm_depth;
        let channel = event.channel.clone();

        // Fast path: the worker already exists.
        {
            let workers = self.workers.read().await;
            if let Some(worker) = workers.get(&channel) {
                return dispatch(worker, event, alarm_depth);
            }
        }

        let mut workers = self.workers.write().await;
        // Shutdown may have drained the map since the accepting check.
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SubmitError { channel });
        }
        if !workers.contains_key(&channel) {
            let worker = self.spawn_worker(channel.clone());
            workers.insert(channel.clone(), worker);
            info!(channel = %channel, "Started channel worker");
        }
        // Present by construction under the write lock.
        match workers.get(&channel) {
            Some(worker) => dispatch(worker, event, alarm_depth),
            None => Err(SubmitError { channel }),
        }
    }

    /// Number of live channel workers.
    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Stop accepting submissions, let every worker drain its queue and
    /// finish its in-flight event, then join them.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);

        let drained: Vec<(ChannelId, ChannelWorker)> =
            self.workers.write().await.drain().collect();
        info!(workers = drained.len(), "Queue manager shutting down");

        for (channel, worker) in drained {
            // Closing the sender ends the worker loop once the queue drains.
            drop(worker.tx);
            if let Err(e) = worker.handle.await {
                warn!(channel = %channel, error = %e, "Channel worker join failed");
            }
        }

        info!("Queue manager stopped");
    }

    fn spawn_worker(&self, channel: ChannelId) -> ChannelWorker {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let handle = tokio::spawn(run_worker(
            channel,
            rx,
            Arc::clone(&depth),
            self.deps.clone(),
            self.report_tx.clone(),
        ));
        ChannelWorker { tx, depth, handle }
    }
}

fn dispatch(
    worker: &ChannelWorker,
    event: MessageEvent,
    alarm_depth: usize,
) -> Result<(), SubmitError> {
    let depth = worker.depth.fetch_add(1, Ordering::SeqCst) + 1;
    if alarm_depth > 0 && depth == alarm_depth {
        warn!(
            channel = %event.channel,
            depth,
            "Channel queue depth crossed alarm threshold"
        );
    }

    worker.tx.send(event).map_err(|e| {
        worker.depth.fetch_sub(1, Ordering::SeqCst);
        SubmitError {
            channel: e.0.channel,
        }
    })
}

/// The per-channel worker loop: strictly sequential FIFO processing.
async fn run_worker(
    channel: ChannelId,
    mut rx: mpsc::UnboundedReceiver<MessageEvent>,
    depth: Arc<AtomicUsize>,
    deps: WorkerDeps,
    report_tx: broadcast::Sender<EventReport>,
) {
    let enhancer = EnhancerPipeline::new(Arc::clone(&deps.gateway));
    let cleaner = CleanerPipeline::new(Arc::clone(&deps.gateway), Arc::clone(&deps.index));

    while let Some(event) = rx.recv().await {
        depth.fetch_sub(1, Ordering::SeqCst);

        // One consistent config view for the whole event.
        let snapshot = deps.config.snapshot().await;

        let enhance = enhancer.run(&event, snapshot.emoji_map()).await;
        // The cleaner runs no matter how the enhancer fared.
        let clean = cleaner.run(&event, &snapshot.cleaner).await;

        info!(
            channel = %event.channel,
            message_id = event.message_id,
            kind = event.kind.label(),
            enhance = enhance.label(),
            clean = clean.label(),
            "Event processed"
        );

        let _ = report_tx.send(EventReport {
            channel: event.channel.clone(),
            message_id: event.message_id,
            kind: event.kind,
            enhance,
            clean,
            finished_at: Utc::now(),
        });

        let delay = snapshot.queue_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    debug!(channel = %channel, "Channel worker drained");
}
