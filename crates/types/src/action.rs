//! Indexing actions.
//!
//! One action records the full effect of one grain commit on that
//! grain's indexes. Actions are immutable once built; the id is the
//! unit of durable dequeue and acknowledge between queue and grain.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ActionId, GrainId, IndexName};
use crate::update::IndexUpdate;

/// Durable record of one grain commit's effect on its indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingAction {
    /// Unit of dequeue/acknowledge.
    pub id: ActionId,
    /// Grain whose commit produced this action.
    pub grain: GrainId,
    /// Effective updates, keyed by index name.
    pub updates: BTreeMap<IndexName, IndexUpdate>,
}

impl IndexingAction {
    /// Builds an action with a fresh id.
    pub fn new(grain: GrainId, updates: BTreeMap<IndexName, IndexUpdate>) -> Self {
        Self { id: ActionId::generate(), grain, updates }
    }
}
