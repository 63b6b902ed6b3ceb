//! Grain directory.
//!
//! The queue processor calls back into grains to read and trim their
//! active-action sets. Grains are addressed by identity and resolved to
//! live activations here; a grain that is not activated simply isn't
//! present (the processor treats its actions as no-longer-active).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use graindex_types::{ActionId, GrainId, Result};

/// Callback surface a grain exposes to the indexing queue.
#[async_trait]
pub trait IndexableGrain: Send + Sync {
    /// The grain's current view of in-flight indexing work.
    async fn active_action_ids(&self) -> Result<HashSet<ActionId>>;

    /// Removes processed action ids from the grain's active set and
    /// persists the envelope.
    async fn remove_action_ids(&self, ids: &[ActionId]) -> Result<()>;
}

/// Identity-to-activation map for indexable grains.
#[derive(Default)]
pub struct GrainDirectory {
    grains: DashMap<GrainId, Arc<dyn IndexableGrain>>,
}

impl GrainDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a grain activation.
    pub fn register(&self, id: GrainId, grain: Arc<dyn IndexableGrain>) {
        self.grains.insert(id, grain);
    }

    /// Removes a grain activation.
    pub fn unregister(&self, id: &GrainId) {
        self.grains.remove(id);
    }

    /// Resolves a grain id to its live activation, if any.
    pub fn resolve(&self, id: &GrainId) -> Option<Arc<dyn IndexableGrain>> {
        self.grains.get(id).map(|g| Arc::clone(&g))
    }
}
