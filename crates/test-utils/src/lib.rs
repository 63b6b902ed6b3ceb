//! Test harness for indexing integration tests.
//!
//! [`IndexingHost`] wires the whole in-process stack: memory store,
//! bucket host, grain directory, queue host, and registry. Tests build
//! a schema, activate grains through the host, and observe index state
//! through the registered clients. Two hosts sharing one store simulate
//! process restart and grain migration.

use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};

use graindex_bucket::BucketHost;
use graindex_client::IndexClient;
use graindex_queue::QueueHost;
use graindex_runtime::{GrainDirectory, MemoryStore, StateStore};
use graindex_state::{IndexedState, Registry, StateSchema, StateSchemaBuilder};
use graindex_types::{GrainId, IndexName, IndexingConfig, InterfaceName, Result};

/// In-process indexing stack for tests.
pub struct IndexingHost {
    /// Shared storage bridge (pass to another host to simulate restart).
    pub store: Arc<MemoryStore>,
    /// Bucket activation directory.
    pub buckets: Arc<BucketHost>,
    /// Grain activation directory.
    pub directory: Arc<GrainDirectory>,
    /// Queue activation directory.
    pub queues: Arc<QueueHost>,
    /// Schema registry.
    pub registry: Registry,
    /// Configuration shared by all components.
    pub config: IndexingConfig,
}

impl IndexingHost {
    /// Host with a fresh store and the fast test configuration.
    pub fn new(node: &str) -> Self {
        Self::with_store(node, Arc::new(MemoryStore::new()))
    }

    /// Host over an existing store (restart/migration scenarios).
    pub fn with_store(node: &str, store: Arc<MemoryStore>) -> Self {
        Self::with_config(node, store, fast_config())
    }

    /// Host with an explicit configuration.
    pub fn with_config(node: &str, store: Arc<MemoryStore>, config: IndexingConfig) -> Self {
        let bridge: Arc<dyn StateStore> = Arc::clone(&store) as Arc<dyn StateStore>;
        let buckets = Arc::new(BucketHost::new(Arc::clone(&bridge), config.storage_retry.clone()));
        let directory = Arc::new(GrainDirectory::new());
        let queues = Arc::new(QueueHost::new(
            node,
            Arc::clone(&bridge),
            config.clone(),
            Arc::clone(&directory),
        ));
        Self { store, buckets, directory, queues, registry: Registry::new(), config }
    }

    /// Builds and registers a schema in one step.
    pub fn register<S: Send + Sync + 'static>(
        &self,
        builder: StateSchemaBuilder<S>,
    ) -> Result<Arc<StateSchema<S>>> {
        let schema = builder.build(&self.config)?;
        self.registry.register(Arc::clone(&schema), &self.buckets, &self.queues)?;
        Ok(schema)
    }

    /// Activates a grain controller; activation registers it in the
    /// directory and runs recovery.
    pub async fn activate_grain<S>(
        &self,
        schema: &Arc<StateSchema<S>>,
        key: &str,
    ) -> Result<Arc<IndexedState<S>>>
    where
        S: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let grain = GrainId::new(schema.interface().clone(), key);
        IndexedState::activate(
            grain,
            Arc::clone(schema),
            Arc::clone(&self.queues),
            Arc::clone(&self.directory),
            Arc::clone(&self.store) as Arc<dyn StateStore>,
            self.config.clone(),
        )
        .await
    }

    /// Deactivates a grain (directory removal only; state stays
    /// persisted).
    pub fn deactivate_grain(&self, grain: &GrainId) {
        self.directory.unregister(grain);
    }

    /// Index client registered for one indexed property.
    pub fn client(&self, interface: &str, property: &str) -> Arc<IndexClient> {
        let interface = InterfaceName::new(interface);
        let clients = self.queues.clients(&interface).expect("interface registered");
        Arc::clone(&clients[&IndexName::from_property(property)])
    }

    /// Waits long enough for the queue processors to drain under the
    /// fast test configuration.
    pub async fn drain(&self) {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    /// Stops all queue processors at their next batch boundary.
    pub async fn shutdown(&self) {
        self.queues.shutdown().await;
    }
}

/// Test configuration: small batches on a short timeout.
pub fn fast_config() -> IndexingConfig {
    IndexingConfig::builder()
        .queue_output_buffer_timeout(Duration::from_millis(10))
        .build()
}

/// Installs a compact tracing subscriber for test diagnostics; safe to
/// call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}
