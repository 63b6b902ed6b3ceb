//! Indexed-state controller.
//!
//! One controller per grain activation. It owns the persisted envelope
//! and the before-image cache, and runs the commit protocol that keeps
//! user-state persistence and index visibility in step:
//!
//! 1. apply the mutation in memory
//! 2. diff each indexed property against its before-image
//! 3. durably enqueue the resulting action (write-ahead)
//! 4. eagerly apply tentative versions of unique updates, serializing
//!    uniqueness before the commit becomes durable
//! 5. persist the envelope (now carrying the action id)
//! 6. refresh the before-image cache
//!
//! A uniqueness violation aborts before the envelope persists; the
//! enqueued action's id never becomes durably active, so the queue
//! processor reverses the tentative write it left behind.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use snafu::ResultExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use graindex_client::IndexClient;
use graindex_queue::QueueHost;
use graindex_runtime::{GrainDirectory, IndexableGrain, StateStore, persist_versioned, try_join_bounded};
use graindex_types::error::{CodecSnafu, InternalSnafu, StorageSnafu};
use graindex_types::{
    ActionId, GrainId, IndexName, IndexUpdate, IndexValue, IndexingAction, IndexingConfig,
    InterfaceName, QueueId, Result, Visibility, decode, encode,
};

use crate::envelope::{IndexedEnvelope, envelope_storage_key};
use crate::registry::StateSchema;

struct ControllerInner<S> {
    envelope: IndexedEnvelope<S>,
    version: Option<u64>,
    /// Last-committed property value per index.
    before_images: HashMap<IndexName, Option<IndexValue>>,
}

/// Per-grain indexed-state controller.
pub struct IndexedState<S> {
    grain: GrainId,
    pk: String,
    schema: Arc<StateSchema<S>>,
    clients: Arc<HashMap<IndexName, Arc<IndexClient>>>,
    queues: Arc<QueueHost>,
    store: Arc<dyn StateStore>,
    config: IndexingConfig,
    inner: Mutex<ControllerInner<S>>,
}

impl<S> IndexedState<S>
where
    S: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Activates the controller: restores the envelope, seeds the
    /// before-image cache from the loaded state, registers the grain in
    /// the directory, and runs recovery for any in-flight indexing
    /// work.
    ///
    /// Registration happens before recovery so that actions recovery
    /// hands to the current queue can already reach this grain for
    /// their active-id check.
    pub async fn activate(
        grain: GrainId,
        schema: Arc<StateSchema<S>>,
        queues: Arc<QueueHost>,
        directory: Arc<GrainDirectory>,
        store: Arc<dyn StateStore>,
        config: IndexingConfig,
    ) -> Result<Arc<Self>> {
        let clients = queues.clients(schema.interface()).ok_or_else(|| {
            InternalSnafu {
                message: format!("interface {} is not registered", schema.interface()),
            }
            .build()
        })?;

        let pk = envelope_storage_key(&grain);
        let record = store
            .read(&pk)
            .await
            .map_err(|e| StorageSnafu { message: e.to_string() }.build())?;
        let (envelope, version) = match record {
            Some(record) => {
                let envelope: IndexedEnvelope<S> = decode(&record.data).context(CodecSnafu)?;
                (envelope, Some(record.version))
            },
            None => (IndexedEnvelope::default(), None),
        };

        let mut before_images = HashMap::new();
        for descriptor in schema.indexes() {
            before_images.insert(descriptor.spec.name.clone(), (descriptor.reader)(&envelope.state));
        }

        debug!(grain = %grain, restored = version.is_some(), "indexed state activated");
        let controller = Arc::new(Self {
            grain: grain.clone(),
            pk,
            schema,
            clients,
            queues,
            store,
            config,
            inner: Mutex::new(ControllerInner { envelope, version, before_images }),
        });
        directory.register(grain, Arc::clone(&controller) as Arc<dyn IndexableGrain>);
        controller.recover().await?;
        Ok(controller)
    }

    /// This grain's identity.
    pub fn grain(&self) -> &GrainId {
        &self.grain
    }

    /// Reads through the current state.
    pub async fn perform_read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&S) -> R,
    {
        let inner = self.inner.lock().await;
        f(&inner.envelope.state)
    }

    /// Snapshot of the in-flight action ids (testing and diagnostics).
    pub async fn active_actions(&self) -> HashSet<ActionId> {
        self.inner.lock().await.envelope.active_action_ids.clone()
    }

    /// Applies `f` to the state under the commit protocol.
    ///
    /// # Errors
    ///
    /// Returns
    /// [`UniquenessViolation`](graindex_types::IndexError::UniquenessViolation)
    /// when a unique index rejects the commit; the state mutation is
    /// rolled back and the envelope is not persisted. Storage and codec
    /// failures abort the same way.
    pub async fn perform_update<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut S) -> R,
    {
        let mut inner = self.inner.lock().await;
        let prior_state = inner.envelope.state.clone();
        let result = f(&mut inner.envelope.state);

        let mut updates: BTreeMap<IndexName, IndexUpdate> = BTreeMap::new();
        for descriptor in self.schema.indexes() {
            let name = &descriptor.spec.name;
            let before = inner.before_images.get(name).cloned().flatten();
            let after = (descriptor.reader)(&inner.envelope.state);
            let update = IndexUpdate::from_images(before, after, Visibility::NonTentative);
            if update.is_effective() {
                updates.insert(name.clone(), update);
            }
        }

        // The envelope is rewritten on every update, indexes touched or
        // not.
        if updates.is_empty() {
            self.persist(&mut inner).await?;
            return Ok(result);
        }

        if self.schema.eager() {
            if let Err(err) = self.apply_direct(&updates).await {
                inner.envelope.state = prior_state;
                return Err(err);
            }
            self.persist(&mut inner).await?;
            Self::refresh_before_images(&mut inner, &updates);
            return Ok(result);
        }

        // Write-ahead: the action is durable in the queue before the
        // envelope that references it.
        let action = IndexingAction::new(self.grain.clone(), updates.clone());
        let action_id = action.id;
        let queue = self.queues.queue_for(self.schema.interface()).await?;
        queue.enqueue(action).await?;
        inner.envelope.active_action_ids.insert(action_id);
        inner.envelope.queues.insert(self.schema.interface().clone(), queue.id().clone());

        let unique_names: Vec<IndexName> = updates
            .keys()
            .filter(|name| self.clients.get(*name).is_some_and(|c| c.spec().is_unique()))
            .cloned()
            .collect();
        if !unique_names.is_empty() {
            if let Err(err) = self.apply_tentative(&unique_names, &updates).await {
                // Abort: the id never becomes durably active, so the
                // processor reverses whatever tentative write landed.
                inner.envelope.state = prior_state;
                inner.envelope.active_action_ids.remove(&action_id);
                warn!(grain = %self.grain, error = %err, "commit aborted by eager uniqueness check");
                return Err(err);
            }
        }

        if let Err(err) = self.persist(&mut inner).await {
            inner.envelope.state = prior_state;
            inner.envelope.active_action_ids.remove(&action_id);
            return Err(err);
        }
        Self::refresh_before_images(&mut inner, &updates);
        Ok(result)
    }

    /// Eager-schema path: apply every update directly, no queue.
    async fn apply_direct(&self, updates: &BTreeMap<IndexName, IndexUpdate>) -> Result<()> {
        let applications: Vec<_> = updates
            .iter()
            .map(|(name, update)| {
                let client = Arc::clone(&self.clients[name]);
                let update = update.clone();
                let grain = self.grain.clone();
                async move { client.apply_update(&grain, &update).await.map(|_| ()) }
            })
            .collect();
        try_join_bounded(self.config.index_update_parallelism as usize, applications)
            .await
            .map(|_| ())
    }

    /// Applies tentative versions of the unique updates, serializing
    /// uniqueness ahead of the durable commit.
    async fn apply_tentative(
        &self,
        unique_names: &[IndexName],
        updates: &BTreeMap<IndexName, IndexUpdate>,
    ) -> Result<()> {
        let applications: Vec<_> = unique_names
            .iter()
            .map(|name| {
                let client = Arc::clone(&self.clients[name]);
                let update = updates[name].with_visibility(Visibility::Tentative);
                let grain = self.grain.clone();
                async move { client.apply_update(&grain, &update).await.map(|_| ()) }
            })
            .collect();
        try_join_bounded(self.config.index_update_parallelism as usize, applications)
            .await
            .map(|_| ())
    }

    fn refresh_before_images(
        inner: &mut ControllerInner<S>,
        updates: &BTreeMap<IndexName, IndexUpdate>,
    ) {
        for (name, update) in updates {
            inner.before_images.insert(name.clone(), update.after.clone());
        }
    }

    /// Activation recovery: intersect the write-ahead marker with what
    /// the referenced queues still hold, transferring pending actions
    /// when the queue identity has changed (grain migration).
    async fn recover(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.envelope.active_action_ids.is_empty() {
            return Ok(());
        }

        let active = inner.envelope.active_action_ids.clone();
        let references: Vec<(InterfaceName, QueueId)> =
            inner.envelope.queues.iter().map(|(i, q)| (i.clone(), q.clone())).collect();

        let mut surviving: HashSet<ActionId> = HashSet::new();
        let mut queue_map_changed = false;
        for (interface, queue_id) in references {
            let referenced = self.queues.queue_by_id(&queue_id).await?;
            let pending: HashSet<ActionId> =
                referenced.pending_action_ids().intersection(&active).copied().collect();

            let current_id = self.queues.current_queue_id(&interface);
            if current_id != queue_id {
                if !pending.is_empty() {
                    let actions: Vec<IndexingAction> = referenced
                        .unprocessed_actions()
                        .into_iter()
                        .filter(|action| pending.contains(&action.id))
                        .collect();
                    let current = self.queues.queue_for(&interface).await?;
                    current.enqueue_batch(actions).await?;
                    referenced.dequeue(&pending).await?;
                    debug!(
                        grain = %self.grain,
                        from = %queue_id,
                        to = %current_id,
                        transferred = pending.len(),
                        "moved pending actions to the current queue"
                    );
                }
                inner.envelope.queues.insert(interface, current_id);
                queue_map_changed = true;
            }
            surviving.extend(pending);
        }

        // Ids nothing upstream still holds are stale markers.
        if surviving != active || queue_map_changed {
            let dropped = active.len() - surviving.len();
            if dropped > 0 {
                debug!(grain = %self.grain, dropped, "cleared stale action ids during recovery");
            }
            inner.envelope.active_action_ids = surviving;
            self.persist(&mut inner).await?;
        }
        Ok(())
    }

    async fn persist(&self, inner: &mut ControllerInner<S>) -> Result<()> {
        let data = encode(&inner.envelope).context(CodecSnafu)?;
        let version = persist_versioned(
            self.store.as_ref(),
            &self.config.storage_retry,
            &self.pk,
            data,
            inner.version,
        )
        .await
        .map_err(|e| StorageSnafu { message: e.to_string() }.build())?;
        inner.version = Some(version);
        Ok(())
    }
}

#[async_trait]
impl<S> IndexableGrain for IndexedState<S>
where
    S: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn active_action_ids(&self) -> Result<HashSet<ActionId>> {
        Ok(self.inner.lock().await.envelope.active_action_ids.clone())
    }

    async fn remove_action_ids(&self, ids: &[ActionId]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let mut changed = false;
        for id in ids {
            changed |= inner.envelope.active_action_ids.remove(id);
        }
        if changed {
            self.persist(&mut inner).await?;
        }
        Ok(())
    }
}
