//! Queue activation directory.
//!
//! One indexing queue per grain interface per node. The host activates
//! the queue and its drain processor together on first use; recovery
//! paths can resolve a previously referenced queue by identity without
//! starting a processor for it (a reincarnated-queue lookup during
//! migration transfer).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use graindex_client::IndexClient;
use graindex_runtime::{GrainDirectory, StateStore};
use graindex_types::error::InvalidArgumentSnafu;
use graindex_types::{IndexName, IndexingConfig, InterfaceName, QueueId, Result};

use crate::processor::{IndexingQueueProcessor, ProcessorHandle};
use crate::queue::IndexingQueue;

/// On-demand activation directory for indexing queues.
pub struct QueueHost {
    node: String,
    store: Arc<dyn StateStore>,
    config: IndexingConfig,
    directory: Arc<GrainDirectory>,
    interfaces: DashMap<InterfaceName, Arc<HashMap<IndexName, Arc<IndexClient>>>>,
    queues: DashMap<QueueId, Arc<IndexingQueue>>,
    handles: Mutex<Vec<ProcessorHandle>>,
    activation: tokio::sync::Mutex<()>,
}

impl QueueHost {
    /// Creates a host for `node` over the given storage bridge.
    pub fn new(
        node: impl Into<String>,
        store: Arc<dyn StateStore>,
        config: IndexingConfig,
        directory: Arc<GrainDirectory>,
    ) -> Self {
        Self {
            node: node.into(),
            store,
            config,
            directory,
            interfaces: DashMap::new(),
            queues: DashMap::new(),
            handles: Mutex::new(Vec::new()),
            activation: tokio::sync::Mutex::new(()),
        }
    }

    /// Node label baked into queue identities.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Registers the index clients of one interface. The registry calls
    /// this once at startup.
    pub fn register_interface(
        &self,
        interface: InterfaceName,
        clients: Arc<HashMap<IndexName, Arc<IndexClient>>>,
    ) {
        self.interfaces.insert(interface, clients);
    }

    /// Index clients registered for an interface.
    pub fn clients(&self, interface: &InterfaceName) -> Option<Arc<HashMap<IndexName, Arc<IndexClient>>>> {
        self.interfaces.get(interface).map(|c| Arc::clone(&c))
    }

    /// The queue identity this host assigns to an interface today.
    pub fn current_queue_id(&self, interface: &InterfaceName) -> QueueId {
        QueueId::for_interface(interface, &self.node)
    }

    /// Resolves the interface's current queue, activating the queue and
    /// its drain processor on first use.
    pub async fn queue_for(&self, interface: &InterfaceName) -> Result<Arc<IndexingQueue>> {
        let id = self.current_queue_id(interface);
        if let Some(queue) = self.queues.get(&id) {
            return Ok(Arc::clone(&queue));
        }

        // Exactly one drain processor per queue: serialize activation
        // and re-check under the lock.
        let _activating = self.activation.lock().await;
        if let Some(queue) = self.queues.get(&id) {
            return Ok(Arc::clone(&queue));
        }

        let clients = self.clients(interface).ok_or_else(|| {
            InvalidArgumentSnafu {
                message: format!("interface {interface} has no registered indexes"),
            }
            .build()
        })?;

        let (queue, input) = IndexingQueue::activate(
            id.clone(),
            Arc::clone(&self.store),
            self.config.storage_retry.clone(),
            self.config.queue_input_buffer_size as usize,
        )
        .await?;

        let handle = IndexingQueueProcessor::spawn(
            Arc::clone(&queue),
            input,
            clients,
            Arc::clone(&self.directory),
            self.config.clone(),
        );
        debug!(queue = %queue.id(), "indexing queue and processor started");

        self.handles.lock().push(handle);
        self.queues.insert(id, Arc::clone(&queue));
        Ok(queue)
    }

    /// Resolves a queue by a previously persisted identity without
    /// starting a processor: the reincarnated-queue lookup used when a
    /// migrated grain transfers its pending actions.
    pub async fn queue_by_id(&self, id: &QueueId) -> Result<Arc<IndexingQueue>> {
        if let Some(queue) = self.queues.get(id) {
            return Ok(Arc::clone(&queue));
        }
        let (queue, _input) = IndexingQueue::activate(
            id.clone(),
            Arc::clone(&self.store),
            self.config.storage_retry.clone(),
            self.config.queue_input_buffer_size as usize,
        )
        .await?;
        debug!(queue = %queue.id(), "passive queue activation for migration transfer");
        Ok(queue)
    }

    /// Stops every drain processor at its next batch boundary.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            handle.shutdown().await;
        }
    }
}
