//! Worker-thread embedding with in-order reassembly.
//!
//! Batches go out over a bounded channel, come back in whatever order the
//! workers finish, and are stitched back together by batch id so vector `i`
//! always belongs to text `i`.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{DocQaError, Result};

use super::EmbeddingGateway;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Embeds batches on worker threads and hands results back in submission order.
pub struct EmbeddingPool {
    tasks: Sender<EmbeddingTask>,
    results: Receiver<EmbeddingResult>,
    batch_size: usize,
    capacity: usize,
}

impl EmbeddingPool {
    /// Starts `worker_threads` workers sharing `gateway`; texts are sent `batch_size` at a time.
    pub fn spawn(gateway: EmbeddingGateway, worker_threads: usize, batch_size: usize) -> Self {
        let worker_threads = worker_threads.max(1);
        let batch_size = batch_size.max(1);
        let capacity = worker_threads * 2;
        tracing::info!(
            batch_size,
            workers = worker_threads,
            model = gateway.model_name(),
            "launching embedding workers"
        );
        let (task_tx, task_rx) = bounded::<EmbeddingTask>(capacity);
        let (result_tx, result_rx) = bounded::<EmbeddingResult>(capacity);
        for worker_id in 0..worker_threads {
            let worker_gateway = gateway.clone();
            let worker_rx = task_rx.clone();
            let worker_tx = result_tx.clone();
            thread::spawn(move || worker_loop(worker_id, worker_rx, worker_tx, worker_gateway));
        }
        Self {
            tasks: task_tx,
            results: result_rx,
            batch_size,
            capacity,
        }
    }

    /// Embeds `texts`, one unit vector per text in input order.
    ///
    /// On failure the first error is returned after every in-flight batch has
    /// been collected, so the next call starts from a clean channel.
    pub fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(DocQaError::Input("no texts provided for embedding".into()));
        }
        let total = texts.len();
        let mut queued = texts
            .chunks(self.batch_size)
            .map(|batch| batch.iter().map(|text| text.to_string()).collect::<Vec<_>>())
            .enumerate();
        let batches = total.div_ceil(self.batch_size);
        let mut ready: BTreeMap<usize, Vec<Vec<f32>>> = BTreeMap::new();
        let mut vectors = Vec::with_capacity(total);
        let mut next_result_id = 0usize;
        let mut inflight = 0usize;
        let mut failure: Option<DocQaError> = None;

        loop {
            while failure.is_none() && inflight < self.capacity {
                let Some((id, inputs)) = queued.next() else {
                    break;
                };
                self.tasks
                    .send(EmbeddingTask { id, inputs })
                    .map_err(|_| DocQaError::Embedding("embedding worker channel closed".into()))?;
                inflight += 1;
            }
            if inflight == 0 {
                break;
            }
            let result = match self.results.recv_timeout(PROGRESS_INTERVAL) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => {
                    tracing::info!(
                        inflight,
                        next_batch = next_result_id,
                        "still waiting on embedding batches"
                    );
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DocQaError::Embedding(
                        "embedding worker channel closed unexpectedly".into(),
                    ));
                }
            };
            inflight -= 1;
            match result {
                Ok(batch) if failure.is_none() => {
                    ready.insert(batch.id, batch.vectors);
                    while let Some(batch_vectors) = ready.remove(&next_result_id) {
                        vectors.extend(batch_vectors);
                        next_result_id += 1;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if next_result_id != batches || vectors.len() != total {
            return Err(DocQaError::Embedding(format!(
                "reassembled {} vectors from {} of {} batches for {} texts",
                vectors.len(),
                next_result_id,
                batches,
                total
            )));
        }
        Ok(vectors)
    }
}

fn worker_loop(
    worker_id: usize,
    receiver: Receiver<EmbeddingTask>,
    sender: Sender<EmbeddingResult>,
    gateway: EmbeddingGateway,
) {
    for task in receiver.iter() {
        let EmbeddingTask { id, inputs } = task;
        let texts: Vec<&str> = inputs.iter().map(String::as_str).collect();
        tracing::debug!(worker_id, batch = id, chunks = texts.len(), "embedding batch");
        let result = gateway
            .embed_batch(&texts)
            .map(|vectors| EmbeddedBatch { id, vectors })
            .inspect_err(|err| {
                tracing::warn!(
                    worker_id,
                    batch = id,
                    chunks = texts.len(),
                    error = %err,
                    "embedding batch failed"
                );
            });
        if sender.send(result).is_err() {
            break;
        }
    }
}

struct EmbeddingTask {
    id: usize,
    inputs: Vec<String>,
}

struct EmbeddedBatch {
    id: usize,
    vectors: Vec<Vec<f32>>,
}

type EmbeddingResult = Result<EmbeddedBatch>;
