//! Index registry.
//!
//! Rust has no annotation scanning, so indexed-state classes declare
//! their indexes through the builder: one typed property-reader closure
//! per index, bound once at build time (no per-update reflection). The
//! registry validates each schema, instantiates one index client per
//! index, and stays immutable for the life of the process.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use graindex_bucket::BucketHost;
use graindex_client::{HashScope, IndexClient, IndexKind, IndexSpec, PartitionScheme};
use graindex_queue::QueueHost;
use graindex_types::error::ConfigSnafu;
use graindex_types::{
    IndexName, IndexValue, IndexingConfig, InterfaceName, KeyType, PartitionBin, Result,
    value::IntoIndexValue,
};

/// Property reader bound at schema-build time.
pub type PropertyReader<S> = Arc<dyn Fn(&S) -> Option<IndexValue> + Send + Sync>;

/// One declared index: routing spec plus the bound property reader.
#[derive(Clone)]
pub struct IndexDescriptor<S> {
    /// Routing descriptor shared with client and queue.
    pub spec: IndexSpec,
    /// Eager indexes apply on commit instead of through the queue.
    pub eager: bool,
    /// Reads the indexed property off the state object.
    pub reader: PropertyReader<S>,
}

/// Declared options for a hash index.
#[derive(Debug, Clone)]
pub struct HashIndexOptions {
    /// At most one confirmed grain per key.
    pub unique: bool,
    /// Apply on commit instead of through the queue.
    pub eager: bool,
    /// Chain threshold per bucket; 0 disables chaining.
    pub max_bucket_size: usize,
    /// Physical layout.
    pub scope: HashScope,
    /// Partition count; `None` resolves to the configured default.
    pub partitions: Option<u32>,
}

impl Default for HashIndexOptions {
    fn default() -> Self {
        Self {
            unique: false,
            eager: false,
            max_bucket_size: 0,
            scope: HashScope::PartitionedByKey,
            partitions: None,
        }
    }
}

/// Declared options for a sorted index.
#[derive(Debug, Clone, Default)]
pub struct SortedIndexOptions {
    /// Apply on commit instead of through the queue.
    pub eager: bool,
    /// Chain threshold per bucket; 0 disables chaining.
    pub max_bucket_size: usize,
    /// Bin granularity; `None` resolves to the configured default.
    pub bin: Option<PartitionBin>,
}

/// Validated, immutable index declarations of one indexed-state class.
pub struct StateSchema<S> {
    interface: InterfaceName,
    eager: bool,
    indexes: Vec<IndexDescriptor<S>>,
}

impl<S> StateSchema<S> {
    /// Interface this schema indexes.
    pub fn interface(&self) -> &InterfaceName {
        &self.interface
    }

    /// True when this schema's indexes apply eagerly on commit.
    pub fn eager(&self) -> bool {
        self.eager
    }

    /// Declared indexes.
    pub fn indexes(&self) -> &[IndexDescriptor<S>] {
        &self.indexes
    }
}

/// Builder for [`StateSchema`], the annotation-scan equivalent.
pub struct StateSchemaBuilder<S> {
    interface: InterfaceName,
    declarations: Vec<Declaration<S>>,
}

struct Declaration<S> {
    property: String,
    key_type: KeyType,
    kind: DeclaredKind,
    reader: PropertyReader<S>,
}

enum DeclaredKind {
    Hash(HashIndexOptions),
    Sorted(SortedIndexOptions),
}

impl<S> StateSchemaBuilder<S> {
    /// Starts a schema for one grain interface.
    pub fn new(interface: impl Into<InterfaceName>) -> Self {
        Self { interface: interface.into(), declarations: Vec::new() }
    }

    /// Declares a hash index over `property`.
    ///
    /// The reader's return type fixes the index key type, so declared
    /// and actual key types cannot diverge.
    pub fn hash_index<K, R>(mut self, property: &str, reader: R, options: HashIndexOptions) -> Self
    where
        K: IntoIndexValue,
        R: Fn(&S) -> Option<K> + Send + Sync + 'static,
    {
        self.declarations.push(Declaration {
            property: property.to_string(),
            key_type: K::KEY_TYPE,
            kind: DeclaredKind::Hash(options),
            reader: Arc::new(move |state| reader(state).map(Into::into)),
        });
        self
    }

    /// Declares a sorted (range-lookup) index over `property`.
    pub fn sorted_index<K, R>(mut self, property: &str, reader: R, options: SortedIndexOptions) -> Self
    where
        K: IntoIndexValue,
        R: Fn(&S) -> Option<K> + Send + Sync + 'static,
    {
        self.declarations.push(Declaration {
            property: property.to_string(),
            key_type: K::KEY_TYPE,
            kind: DeclaredKind::Sorted(options),
            reader: Arc::new(move |state| reader(state).map(Into::into)),
        });
        self
    }

    /// Validates the declarations and resolves partition schemes
    /// against the configuration defaults.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error on duplicate index names, mixed
    /// eagerness, a sorted index whose key type the date-time scheme
    /// cannot bin, or an empty schema.
    pub fn build(self, config: &IndexingConfig) -> Result<Arc<StateSchema<S>>> {
        if self.declarations.is_empty() {
            return ConfigSnafu {
                message: format!("interface {} declares no indexes", self.interface),
            }
            .fail();
        }

        let mut seen = HashSet::new();
        let mut eagerness: Option<bool> = None;
        let mut indexes = Vec::with_capacity(self.declarations.len());

        for declaration in self.declarations {
            let name = IndexName::from_property(&declaration.property);
            if !seen.insert(name.clone()) {
                return ConfigSnafu {
                    message: format!("duplicate index {name} on interface {}", self.interface),
                }
                .fail();
            }

            let (kind, eager, max_bucket_size, scheme) = match declaration.kind {
                DeclaredKind::Hash(options) => {
                    let partitions =
                        options.partitions.unwrap_or(config.default_max_hash_index_partitions);
                    (
                        IndexKind::Hash { unique: options.unique, scope: options.scope },
                        options.eager,
                        options.max_bucket_size,
                        PartitionScheme::Hash { partitions },
                    )
                },
                DeclaredKind::Sorted(options) => {
                    if declaration.key_type != KeyType::Time {
                        return ConfigSnafu {
                            message: format!(
                                "sorted index {name} has key type {} but the date-time scheme bins instants",
                                declaration.key_type
                            ),
                        }
                        .fail();
                    }
                    let bin = options.bin.unwrap_or(config.default_date_time_partition_bin);
                    (
                        IndexKind::Sorted,
                        options.eager,
                        options.max_bucket_size,
                        PartitionScheme::DateTime { bin },
                    )
                },
            };

            match eagerness {
                None => eagerness = Some(eager),
                Some(previous) if previous != eager => {
                    return ConfigSnafu {
                        message: format!(
                            "interface {} mixes eager and lazy indexes; eagerness is per state class",
                            self.interface
                        ),
                    }
                    .fail();
                },
                Some(_) => {},
            }

            indexes.push(IndexDescriptor {
                spec: IndexSpec {
                    interface: self.interface.clone(),
                    name,
                    kind,
                    key_type: declaration.key_type,
                    max_bucket_size,
                    scheme,
                },
                eager,
                reader: declaration.reader,
            });
        }

        Ok(Arc::new(StateSchema {
            interface: self.interface,
            eager: eagerness.unwrap_or(false),
            indexes,
        }))
    }
}

/// Process-wide registry of indexed-state schemas and their clients.
///
/// Built once at startup; read-only afterwards.
#[derive(Default)]
pub struct Registry {
    schemas: DashMap<InterfaceName, Arc<dyn Any + Send + Sync>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one schema: instantiates an index client per declared
    /// index over `buckets` and binds them to the interface's queue
    /// host.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when the interface already has an
    /// indexed-state type registered.
    pub fn register<S: Send + Sync + 'static>(
        &self,
        schema: Arc<StateSchema<S>>,
        buckets: &Arc<BucketHost>,
        queues: &QueueHost,
    ) -> Result<()> {
        let interface = schema.interface().clone();
        if self.schemas.contains_key(&interface) {
            return ConfigSnafu {
                message: format!("interface {interface} already has an indexed-state type"),
            }
            .fail();
        }

        let mut clients: HashMap<IndexName, Arc<IndexClient>> = HashMap::new();
        for descriptor in schema.indexes() {
            clients.insert(
                descriptor.spec.name.clone(),
                Arc::new(IndexClient::new(descriptor.spec.clone(), Arc::clone(buckets))),
            );
        }
        info!(
            interface = %interface,
            indexes = clients.len(),
            eager = schema.eager(),
            "registered indexed-state schema"
        );

        queues.register_interface(interface.clone(), Arc::new(clients));
        self.schemas.insert(interface, schema);
        Ok(())
    }

    /// Fetches the schema registered for an interface.
    pub fn schema<S: Send + Sync + 'static>(
        &self,
        interface: &InterfaceName,
    ) -> Option<Arc<StateSchema<S>>> {
        let any = self.schemas.get(interface).map(|s| Arc::clone(&s))?;
        any.downcast::<StateSchema<S>>().ok()
    }

    /// Number of registered interfaces.
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
