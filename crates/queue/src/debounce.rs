//! Debounced persistence.
//!
//! Queue-state writes are expensive, so overlapping writers coalesce:
//! every writer's prepare (the in-memory mutation) runs, but only one
//! commit per overlap window hits storage. Write ids are issued after
//! prepare; a writer whose id is already covered by a completed commit
//! skips its own commit, because that commit observed its mutation.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

/// Coalesces overlapping persistence writes.
#[derive(Debug, Default)]
pub struct WriteDebouncer {
    seq: AtomicU64,
    committed: Mutex<u64>,
}

impl WriteDebouncer {
    /// Creates a debouncer with no writes issued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `prepare`, then commits unless an overlapping commit
    /// already covered this write.
    ///
    /// `prepare` must apply the in-memory mutation; `commit` must
    /// snapshot and persist the full current state. The invariant that
    /// makes skipping safe: a commit sets the covered watermark to the
    /// highest id issued before it ran, and every id issued before a
    /// commit had its prepare complete before that commit's snapshot.
    ///
    /// # Errors
    ///
    /// Propagates the commit's error. Coalesced writers observe `Ok`
    /// only after a covering commit completed.
    pub async fn write<P, C, Fut, E>(&self, prepare: P, commit: C) -> Result<(), E>
    where
        P: FnOnce(),
        C: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        prepare();
        let id = self.seq.fetch_add(1, Ordering::SeqCst) + 1;

        let mut committed = self.committed.lock().await;
        if *committed >= id {
            return Ok(());
        }
        // Ids at or below this watermark prepared before the snapshot
        // the commit is about to take.
        let covered = self.seq.load(Ordering::SeqCst);
        commit().await?;
        *committed = covered;
        Ok(())
    }
}
