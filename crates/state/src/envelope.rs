//! Persisted grain envelope.
//!
//! The envelope wraps the user state with the indexing bookkeeping that
//! must commit atomically with it: the active-action-id set (the
//! write-ahead marker consulted during recovery) and the queue identity
//! per interface (so a migrated grain can find and drain its previous
//! queue).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use graindex_types::{ActionId, InterfaceName, QueueId};

/// Durable per-grain record: user state plus in-flight indexing work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedEnvelope<S> {
    /// The user's state object.
    pub state: S,
    /// Ids of indexing actions enqueued but not yet acknowledged by the
    /// queue processor.
    pub active_action_ids: HashSet<ActionId>,
    /// Queue identity last used per interface.
    pub queues: HashMap<InterfaceName, QueueId>,
}

impl<S: Default> Default for IndexedEnvelope<S> {
    fn default() -> Self {
        Self { state: S::default(), active_action_ids: HashSet::new(), queues: HashMap::new() }
    }
}

/// Storage key of a grain's envelope record.
pub(crate) fn envelope_storage_key(grain: &graindex_types::GrainId) -> String {
    format!("{grain}#state")
}

#[cfg(test)]
mod tests {
    use graindex_types::GrainId;

    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct JobState {
        status: String,
    }

    #[test]
    fn test_envelope_roundtrip() {
        let mut envelope = IndexedEnvelope::<JobState>::default();
        envelope.state.status = "Started".to_string();
        envelope.active_action_ids.insert(ActionId::generate());
        envelope.queues.insert(
            InterfaceName::new("app.IJobGrain"),
            QueueId::for_interface(&InterfaceName::new("app.IJobGrain"), "node-1"),
        );

        let bytes = graindex_types::encode(&envelope).expect("encode");
        let decoded: IndexedEnvelope<JobState> = graindex_types::decode(&bytes).expect("decode");
        assert_eq!(decoded.state, envelope.state);
        assert_eq!(decoded.active_action_ids, envelope.active_action_ids);
        assert_eq!(decoded.queues, envelope.queues);
    }

    #[test]
    fn test_storage_key_shape() {
        let grain = GrainId::new("app.IJobGrain", "j1");
        assert_eq!(envelope_storage_key(&grain), "app.IJobGrain/j1#state");
    }
}
