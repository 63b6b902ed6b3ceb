//! Queue drain loop.
//!
//! The processor batches actions from the queue's input channel by
//! count and by elapsed time, joins each batch against the owning
//! grains' active-action sets, applies updates across indexes with
//! bounded parallelism (serial within one index), acknowledges the
//! grains, and persists the dequeued queue state behind a punctuation.
//!
//! Any unhandled failure deactivates the processor; reactivation
//! replays the unprocessed suffix from the persisted queue state, and
//! the active-id join keeps the replay safe: actions whose grain no
//! longer lists them are reversed (unique) or dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use graindex_client::IndexClient;
use graindex_runtime::{GrainDirectory, IndexableGrain as _, try_join_bounded};
use graindex_types::error::QueueProcessingSnafu;
use graindex_types::{
    ActionId, GrainId, IndexError, IndexName, IndexUpdate, IndexingAction, IndexingConfig, Result,
};

use crate::queue::IndexingQueue;

/// Handle to a spawned processor.
pub struct ProcessorHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl ProcessorHandle {
    /// Requests a cooperative stop at the next batch boundary and waits
    /// for the drain loop to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }

    /// True once the drain loop has exited (shutdown or failure).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the drain loop to exit without cancelling it.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Background processor draining one indexing queue.
pub struct IndexingQueueProcessor {
    queue: Arc<IndexingQueue>,
    input: mpsc::Receiver<IndexingAction>,
    clients: Arc<HashMap<IndexName, Arc<IndexClient>>>,
    directory: Arc<GrainDirectory>,
    config: IndexingConfig,
    cancel: CancellationToken,
}

impl IndexingQueueProcessor {
    /// Spawns the drain loop for `queue`.
    pub fn spawn(
        queue: Arc<IndexingQueue>,
        input: mpsc::Receiver<IndexingAction>,
        clients: Arc<HashMap<IndexName, Arc<IndexClient>>>,
        directory: Arc<GrainDirectory>,
        config: IndexingConfig,
    ) -> ProcessorHandle {
        let cancel = CancellationToken::new();
        let processor = Self { queue, input, clients, directory, config, cancel: cancel.clone() };
        let task = tokio::spawn(processor.run());
        ProcessorHandle { cancel, task }
    }

    #[instrument(skip(self), fields(queue = %self.queue.id()))]
    async fn run(mut self) {
        // Replay the unprocessed suffix left by a previous activation.
        let pending = self.queue.unprocessed_actions();
        if !pending.is_empty() {
            debug!(count = pending.len(), "replaying unprocessed actions");
            let batch_size = self.config.queue_output_buffer_size as usize;
            for chunk in pending.chunks(batch_size.max(1)) {
                if let Err(err) = self.process_batch(chunk.to_vec()).await {
                    let failure: IndexError =
                        QueueProcessingSnafu { message: err.to_string() }.build();
                    error!(error = %failure, "replay failed; deactivating queue processor");
                    return;
                }
            }
        }

        loop {
            let Some(batch) = self.next_batch().await else {
                debug!("queue processor stopping at batch boundary");
                return;
            };
            if let Err(err) = self.process_batch(batch).await {
                // Deactivation with an internal-failure reason; the
                // runtime reactivates and the persisted queue replays.
                let failure: IndexError = QueueProcessingSnafu { message: err.to_string() }.build();
                error!(error = %failure, "batch processing failed; deactivating queue processor");
                return;
            }
        }
    }

    /// Collects the next batch: completes when the count threshold or
    /// the elapsed-time threshold fires, whichever comes first.
    async fn next_batch(&mut self) -> Option<Vec<IndexingAction>> {
        let first = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            action = self.input.recv() => action?,
        };

        let max = (self.config.queue_output_buffer_size as usize).max(1);
        let deadline = tokio::time::Instant::now() + self.config.queue_output_buffer_timeout;
        let mut batch = vec![first];
        while batch.len() < max {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => break,
                action = self.input.recv() => match action {
                    Some(action) => batch.push(action),
                    None => break,
                },
            }
        }
        Some(batch)
    }

    async fn process_batch(&self, batch: Vec<IndexingAction>) -> Result<()> {
        debug!(batch_size = batch.len(), "processing indexing batch");

        // Join by grain so each grain is contacted once per batch.
        let mut ids_by_grain: HashMap<GrainId, Vec<ActionId>> = HashMap::new();
        for action in &batch {
            ids_by_grain.entry(action.grain.clone()).or_default().push(action.id);
        }

        let mut active_by_grain: HashMap<GrainId, HashSet<ActionId>> = HashMap::new();
        for grain_id in ids_by_grain.keys() {
            let active = match self.directory.resolve(grain_id) {
                Some(grain) => grain.active_action_ids().await?,
                // No live activation: nothing claims these actions, so
                // they fall into the no-longer-active path below.
                None => HashSet::new(),
            };
            active_by_grain.insert(grain_id.clone(), active);
        }

        // Per-index work lists, batch order preserved within each
        // index. Reversals are tagged: only they may tolerate a
        // uniqueness violation during apply.
        let mut by_index: HashMap<IndexName, Vec<(GrainId, IndexUpdate, bool)>> = HashMap::new();
        for action in &batch {
            let still_active = active_by_grain
                .get(&action.grain)
                .is_some_and(|active| active.contains(&action.id));
            for (name, update) in &action.updates {
                let Some(client) = self.clients.get(name) else {
                    warn!(index = %name, "action references unknown index; dropping update");
                    continue;
                };
                if still_active {
                    by_index
                        .entry(name.clone())
                        .or_default()
                        .push((action.grain.clone(), update.clone(), false));
                } else if client.spec().is_unique() {
                    // The commit aborted after its eager tentative
                    // write; undo it with the reverse CRUD.
                    by_index
                        .entry(name.clone())
                        .or_default()
                        .push((action.grain.clone(), update.reversed(), true));
                }
            }
        }

        // Serial within an index, parallel across indexes.
        let applications: Vec<_> = by_index
            .into_iter()
            .map(|(name, items)| {
                let client = Arc::clone(&self.clients[&name]);
                async move {
                    for (grain, update, is_reversal) in items {
                        match client.apply_update(&grain, &update).await {
                            Ok(_) => {},
                            Err(err) if is_reversal && err.is_uniqueness_violation() => {
                                // The reversal raced a fresh claim on
                                // the same key; the tentative entry it
                                // targeted is already gone. A violation
                                // on a still-active apply is a real
                                // failure and propagates below.
                                warn!(index = %name, grain = %grain, error = %err, "dropping conflicted reversal");
                            },
                            Err(err) => return Err(err),
                        }
                    }
                    Ok::<_, IndexError>(())
                }
            })
            .collect();
        try_join_bounded(self.config.index_update_parallelism as usize, applications).await?;

        // Acknowledge: clear the processed ids from each grain's
        // active set, then dequeue behind a punctuation.
        for (grain_id, ids) in &ids_by_grain {
            if let Some(grain) = self.directory.resolve(grain_id) {
                grain.remove_action_ids(ids).await?;
            }
        }
        let processed: HashSet<ActionId> = batch.iter().map(|a| a.id).collect();
        self.queue.complete(&processed).await
    }
}
