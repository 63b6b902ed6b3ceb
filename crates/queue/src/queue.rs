//! Durable queue state and the queue actor surface.
//!
//! The queue persists a FIFO of `Action | Punctuation` entries. A
//! punctuation marks the boundary behind which everything was durably
//! processed; processed actions are dequeued at the same time, so
//! entries after the punctuation are the unprocessed (or in-process)
//! suffix and reactivation replays exactly them.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use graindex_runtime::{StateStore, persist_versioned};
use graindex_types::error::{CodecSnafu, StorageSnafu};
use graindex_types::{ActionId, IndexingAction, QueueId, Result, StorageRetryConfig, decode, encode};

use crate::debounce::WriteDebouncer;

/// One durable queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueEntry {
    /// An indexing action awaiting processing.
    Action(IndexingAction),
    /// Everything before this point has been processed.
    Punctuation,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
}

/// Per-interface write-ahead indexing queue.
pub struct IndexingQueue {
    id: QueueId,
    state: Mutex<QueueState>,
    version: Mutex<Option<u64>>,
    store: Arc<dyn StateStore>,
    retry: StorageRetryConfig,
    debouncer: WriteDebouncer,
    input: mpsc::Sender<IndexingAction>,
}

impl IndexingQueue {
    /// Activates the queue, restoring persisted entries, and returns
    /// the processor's input channel receiver.
    pub async fn activate(
        id: QueueId,
        store: Arc<dyn StateStore>,
        retry: StorageRetryConfig,
        input_buffer: usize,
    ) -> Result<(Arc<Self>, mpsc::Receiver<IndexingAction>)> {
        let record = store
            .read(id.as_str())
            .await
            .map_err(|e| StorageSnafu { message: e.to_string() }.build())?;
        let (state, version) = match record {
            Some(record) => {
                let state: QueueState = decode(&record.data).context(CodecSnafu)?;
                (state, Some(record.version))
            },
            None => (QueueState::default(), None),
        };

        debug!(queue = %id, restored_entries = state.entries.len(), "indexing queue activated");
        let (tx, rx) = mpsc::channel(input_buffer.max(1));
        let queue = Arc::new(Self {
            id,
            state: Mutex::new(state),
            version: Mutex::new(version),
            store,
            retry,
            debouncer: WriteDebouncer::new(),
            input: tx,
        });
        Ok((queue, rx))
    }

    /// This queue's identity.
    pub fn id(&self) -> &QueueId {
        &self.id
    }

    /// Number of durable entries (punctuations included).
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Ids of all actions still held by the queue.
    pub fn pending_action_ids(&self) -> HashSet<ActionId> {
        self.state
            .lock()
            .entries
            .iter()
            .filter_map(|entry| match entry {
                QueueEntry::Action(action) => Some(action.id),
                QueueEntry::Punctuation => None,
            })
            .collect()
    }

    /// All actions still held, in FIFO order. Reactivation replays
    /// these.
    pub fn unprocessed_actions(&self) -> Vec<IndexingAction> {
        self.state
            .lock()
            .entries
            .iter()
            .filter_map(|entry| match entry {
                QueueEntry::Action(action) => Some(action.clone()),
                QueueEntry::Punctuation => None,
            })
            .collect()
    }

    /// Durably appends one action, then hands it to the processor.
    ///
    /// The append is the write-ahead step: it completes before the
    /// grain's envelope (which references the action id) is persisted.
    /// A dead processor only costs the channel hand-off; the durable
    /// entry replays on reactivation.
    pub async fn enqueue(&self, action: IndexingAction) -> Result<()> {
        self.persist_with(|state| state.entries.push_back(QueueEntry::Action(action.clone()))).await?;
        self.hand_off(action);
        Ok(())
    }

    /// Non-blocking channel hand-off.
    ///
    /// Enqueues run inside the grain's commit, which the processor may
    /// be waiting on for an active-id query; blocking on a full channel
    /// here would deadlock that pair. On a full buffer the send is
    /// completed from a detached task instead.
    fn hand_off(&self, action: IndexingAction) {
        match self.input.try_send(action) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(action)) => {
                let input = self.input.clone();
                let queue = self.id.clone();
                tokio::spawn(async move {
                    if input.send(action).await.is_err() {
                        warn!(queue = %queue, "queue processor gone; action will replay on reactivation");
                    }
                });
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(queue = %self.id, "queue processor gone; action will replay on reactivation");
            },
        }
    }

    /// Durably appends a batch of actions (queue-migration transfer).
    pub async fn enqueue_batch(&self, actions: Vec<IndexingAction>) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }
        self.persist_with(|state| {
            for action in &actions {
                state.entries.push_back(QueueEntry::Action(action.clone()));
            }
        })
        .await?;

        for action in actions {
            self.hand_off(action);
        }
        Ok(())
    }

    /// Removes actions by id without marking them processed
    /// (queue-migration transfer out).
    pub async fn dequeue(&self, ids: &HashSet<ActionId>) -> Result<()> {
        self.persist_with(|state| {
            state.entries.retain(|entry| match entry {
                QueueEntry::Action(action) => !ids.contains(&action.id),
                QueueEntry::Punctuation => true,
            });
        })
        .await
    }

    /// Dequeues a processed batch and appends the punctuation marking
    /// the processed boundary.
    pub async fn complete(&self, ids: &HashSet<ActionId>) -> Result<()> {
        self.persist_with(|state| {
            state.entries.retain(|entry| match entry {
                QueueEntry::Action(action) => !ids.contains(&action.id),
                QueueEntry::Punctuation => false,
            });
            state.entries.push_front(QueueEntry::Punctuation);
        })
        .await
    }

    /// Runs `mutate` against the in-memory state, then persists through
    /// the debouncer (overlapping writers coalesce into one commit).
    async fn persist_with(&self, mutate: impl FnOnce(&mut QueueState)) -> Result<()> {
        self.debouncer
            .write(
                || mutate(&mut self.state.lock()),
                || async {
                    let data = encode(&*self.state.lock()).context(CodecSnafu)?;
                    let expected = *self.version.lock();
                    let version = persist_versioned(
                        self.store.as_ref(),
                        &self.retry,
                        self.id.as_str(),
                        data,
                        expected,
                    )
                    .await
                    .map_err(|e| StorageSnafu { message: e.to_string() }.build())?;
                    *self.version.lock() = Some(version);
                    Ok(())
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use graindex_runtime::MemoryStore;
    use graindex_types::{GrainId, IndexName, IndexUpdate, IndexValue, Visibility};
    use std::collections::BTreeMap;

    use super::*;

    fn action(key: &str) -> IndexingAction {
        let mut updates = BTreeMap::new();
        updates.insert(
            IndexName::from_property("Status"),
            IndexUpdate::from_images(None, Some(IndexValue::from(key)), Visibility::NonTentative),
        );
        IndexingAction::new(GrainId::new("app.IJobGrain", key), updates)
    }

    async fn queue(store: Arc<MemoryStore>) -> (Arc<IndexingQueue>, mpsc::Receiver<IndexingAction>) {
        IndexingQueue::activate(
            QueueId::for_interface(&"app.IJobGrain".into(), "node-1"),
            store,
            StorageRetryConfig::default(),
            8,
        )
        .await
        .expect("activate queue")
    }

    #[tokio::test]
    async fn test_enqueue_is_durable_and_feeds_channel() {
        let store = Arc::new(MemoryStore::new());
        let (q, mut rx) = queue(Arc::clone(&store)).await;

        let a = action("a");
        q.enqueue(a.clone()).await.expect("enqueue");

        assert!(q.pending_action_ids().contains(&a.id));
        assert_eq!(rx.recv().await.expect("channel"), a);

        // Durability: a fresh activation over the same store restores it.
        let (restored, _rx) = queue(store).await;
        assert!(restored.pending_action_ids().contains(&a.id));
    }

    #[tokio::test]
    async fn test_complete_dequeues_and_punctuates() {
        let store = Arc::new(MemoryStore::new());
        let (q, _rx) = queue(Arc::clone(&store)).await;

        let a = action("a");
        let b = action("b");
        q.enqueue(a.clone()).await.expect("enqueue a");
        q.enqueue(b.clone()).await.expect("enqueue b");

        q.complete(&HashSet::from([a.id])).await.expect("complete a");
        let pending = q.pending_action_ids();
        assert!(!pending.contains(&a.id));
        assert!(pending.contains(&b.id));

        // Exactly one punctuation survives, ahead of the open suffix.
        assert_eq!(q.len(), 2);
        let (restored, _rx) = queue(store).await;
        assert_eq!(restored.unprocessed_actions(), vec![b]);
    }

    #[tokio::test]
    async fn test_dequeue_transfers_out_without_punctuation() {
        let store = Arc::new(MemoryStore::new());
        let (queue, _rx) = queue(store).await;

        let a = action("a");
        queue.enqueue(a.clone()).await.expect("enqueue");
        queue.dequeue(&HashSet::from([a.id])).await.expect("dequeue");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_survives_dead_processor() {
        let store = Arc::new(MemoryStore::new());
        let (queue, rx) = queue(store).await;
        drop(rx);

        let a = action("a");
        queue.enqueue(a.clone()).await.expect("enqueue with dead processor");
        assert_eq!(queue.unprocessed_actions(), vec![a]);
    }
}
