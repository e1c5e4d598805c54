//! Bounded ingestion queue between the HTTP handlers and the single
//! consumer that broadcasts and persists each batch.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use kubestat_common::PodSample;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::hub::Hub;
use crate::store::Store;

pub const QUEUE_CAP: usize = 4096;
/// Queue-full drops are logged only this often.
const DROP_LOG_EVERY: u64 = 32;

/// Producer handle, cheap to clone into request handlers.
#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<Bytes>,
    depth: Arc<AtomicUsize>,
    dropped: Arc<AtomicU64>,
}

pub struct IngestReceiver {
    rx: mpsc::Receiver<Bytes>,
    depth: Arc<AtomicUsize>,
}

pub fn channel(capacity: usize) -> (IngestQueue, IngestReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let depth = Arc::new(AtomicUsize::new(0));
    let queue = IngestQueue {
        tx,
        depth: Arc::clone(&depth),
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (queue, IngestReceiver { rx, depth })
}

impl IngestQueue {
    /// Accepts the batch or sheds it; never blocks the producer. Excess
    /// arrival is discarded rather than queued unboundedly.
    pub fn enqueue(&self, batch: Bytes) -> bool {
        // Counted before the send; the consumer only decrements batches it
        // received, so the counter cannot wrap below zero. A shed batch
        // takes its increment straight back.
        self.depth.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(batch) {
            Ok(()) => true,
            Err(_) => {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % DROP_LOG_EVERY == 0 {
                    warn!(dropped, "ingestion queue full, shedding batches");
                }
                false
            }
        }
    }

    /// Current number of pending batches, exposed by the liveness probe.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// Drains the queue strictly in arrival order for the process lifetime:
/// decode, broadcast the raw bytes, then persist. A batch that fails to
/// decode is discarded whole, so nothing is ever partially broadcast. A
/// persistence failure is logged but the broadcast already delivered stands.
pub async fn run_consumer(mut receiver: IngestReceiver, hub: Arc<Hub>, store: Arc<dyn Store>) {
    while let Some(batch) = receiver.rx.recv().await {
        receiver.depth.fetch_sub(1, Ordering::Relaxed);

        let samples: Vec<PodSample> = match serde_json::from_slice(&batch) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "discarding undecodable batch");
                continue;
            }
        };

        hub.broadcast(batch);

        if let Err(e) = store.put(&samples).await {
            error!(error = %e, "failed to persist batch");
        }
    }
}
