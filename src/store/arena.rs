//! Storage arenas and the locked store core.
//!
//! Every mutable runtime record (state cells, query caches, event channels,
//! pipeline handles, domain bundles) lives in one of the arenas here, keyed
//! by the owning declaration's store-local [`NodeId`] (plus the canonical
//! argument for keyed kinds). Declarations themselves are registered in a
//! side table keyed by allocation identity, with a keepalive handle so the
//! identity can never be reused while the store is alive.

use std::any::Any;
use std::sync::{Arc, Weak};

use rustc_hash::{FxHashMap, FxHashSet};
use uuid::Uuid;

use super::StoreInner;
use crate::errors::StoreError;
use crate::nodes::{DeclMeta, ErasedEvent, ErasedQuery, ErasedState, ErasedStream, ExternBinding};
use crate::types::{IdGen, NodeId, SourceRef, StorageKey, Value};

/// Erased subscriber callback; the typed surface downcasts before invoking
/// the user closure.
pub(crate) type Subscriber = Arc<dyn Fn(&Value) + Send + Sync>;

/// A queued notification, delivered after the lock is released.
pub(crate) enum OutboxItem {
    Notify { subscriber: Subscriber, value: Value },
}

/// What a [`crate::store::Subscription`] releases.
#[derive(Clone, Debug)]
pub(crate) enum SubTarget {
    Query(StorageKey),
    Event(NodeId),
    Domain(NodeId),
}

/// A subscription held internally by a started pipeline (its `from_query` /
/// `from_event` adapters), released when the pipeline is torn down.
pub(crate) struct InternalSub {
    pub(crate) target: SubTarget,
    pub(crate) id: u64,
}

/// A storage scheduled for garbage-collection consideration. Eligibility is
/// re-checked when the collector examines the candidate; storages that never
/// lose a reference are never scheduled and therefore retained.
#[derive(Clone, Debug)]
pub(crate) enum GcTarget {
    State(StorageKey),
    Query(StorageKey),
    Event(NodeId),
    Domain(NodeId),
}

pub(crate) struct StateStorage {
    pub(crate) decl: Arc<dyn ErasedState>,
    pub(crate) value: Value,
    pub(crate) downstream: FxHashSet<StorageKey>,
    pub(crate) owner: NodeId,
}

pub(crate) struct QueryStorage {
    pub(crate) decl: Arc<dyn ErasedQuery>,
    pub(crate) arg: Value,
    pub(crate) value: Value,
    /// Rebuilt from scratch on every recomputation; dependencies are dynamic.
    pub(crate) upstream: FxHashSet<SourceRef>,
    pub(crate) downstream: FxHashSet<StorageKey>,
    pub(crate) subscribers: Vec<(u64, Subscriber)>,
    pub(crate) owner: NodeId,
}

pub(crate) struct EventStorage {
    pub(crate) decl: Arc<dyn ErasedEvent>,
    pub(crate) subscribers: Vec<(u64, Subscriber)>,
    pub(crate) owner: NodeId,
}

pub(crate) struct StreamStorage {
    pub(crate) decl: Arc<dyn ErasedStream>,
    pub(crate) owner: NodeId,
    /// A pipeline starts at most once per storage.
    pub(crate) started: bool,
    pub(crate) sender: Option<Box<dyn Any + Send + Sync>>,
    pub(crate) task: Option<tokio::task::JoinHandle<()>>,
    pub(crate) subs: Vec<InternalSub>,
}

pub(crate) struct DomainStorage {
    pub(crate) name: String,
    /// `None` until the setup closure has run; a torn-down domain reached
    /// again through a surviving declaration handle re-runs setup.
    pub(crate) output: Option<Value>,
    pub(crate) upstream: FxHashSet<NodeId>,
    pub(crate) downstream: FxHashSet<NodeId>,
    /// Active domain subscriptions plus subscriptions to owned storages.
    pub(crate) refs: usize,
    pub(crate) owned_states: FxHashSet<StorageKey>,
    pub(crate) owned_queries: FxHashSet<StorageKey>,
    pub(crate) owned_events: FxHashSet<NodeId>,
    pub(crate) owned_streams: FxHashSet<NodeId>,
    /// Pipelines declared during setup, ignited on domain subscription.
    pub(crate) streams: Vec<Arc<dyn ErasedStream>>,
}

impl DomainStorage {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            output: None,
            upstream: FxHashSet::default(),
            downstream: FxHashSet::default(),
            refs: 0,
            owned_states: FxHashSet::default(),
            owned_queries: FxHashSet::default(),
            owned_events: FxHashSet::default(),
            owned_streams: FxHashSet::default(),
            streams: Vec::new(),
        }
    }
}

pub(crate) struct DeclEntry {
    pub(crate) id: NodeId,
    // Holds the declaration allocation alive so its identity key stays
    // unique for the life of the store.
    #[allow(dead_code)]
    pub(crate) keep: Box<dyn Any + Send + Sync>,
}

pub(crate) struct ExternSlot {
    pub(crate) value: Value,
    #[allow(dead_code)]
    pub(crate) keep: Arc<dyn Any + Send + Sync>,
}

pub(crate) struct StoreCore {
    pub(crate) name: String,
    pub(crate) store_id: Uuid,
    pub(crate) destroyed: bool,
    pub(crate) ids: IdGen,
    pub(crate) weak_self: Weak<StoreInner>,
    pub(crate) decl_ids: FxHashMap<usize, DeclEntry>,
    pub(crate) states: FxHashMap<StorageKey, StateStorage>,
    pub(crate) queries: FxHashMap<StorageKey, QueryStorage>,
    pub(crate) events: FxHashMap<NodeId, EventStorage>,
    pub(crate) streams: FxHashMap<NodeId, StreamStorage>,
    pub(crate) domains: FxHashMap<NodeId, DomainStorage>,
    pub(crate) externs: FxHashMap<usize, ExternSlot>,
    /// Domains whose setup closure is currently executing, innermost last.
    pub(crate) domain_stack: Vec<NodeId>,
    /// Queries currently being evaluated; cycle detection.
    pub(crate) computing: FxHashSet<StorageKey>,
    /// Storages whose value changed in the in-flight cascade, in
    /// first-dirtied order. Each notifies exactly once at commit.
    pub(crate) dirty: Vec<StorageKey>,
    pub(crate) dirty_set: FxHashSet<StorageKey>,
    pub(crate) outbox: Vec<OutboxItem>,
    pub(crate) gc_queue: Vec<GcTarget>,
    next_sub_id: u64,
}

impl StoreCore {
    pub(crate) fn new(
        name: String,
        store_id: Uuid,
        weak_self: Weak<StoreInner>,
        externs: Vec<ExternBinding>,
    ) -> Self {
        let mut domains = FxHashMap::default();
        domains.insert(
            NodeId::DEFAULT_DOMAIN,
            DomainStorage::new(format!("{name}.default")),
        );
        let externs = externs
            .into_iter()
            .map(|binding| {
                (
                    binding.key,
                    ExternSlot {
                        value: binding.value,
                        keep: binding.keep,
                    },
                )
            })
            .collect();
        Self {
            name,
            store_id,
            destroyed: false,
            ids: IdGen::new(),
            weak_self,
            decl_ids: FxHashMap::default(),
            states: FxHashMap::default(),
            queries: FxHashMap::default(),
            events: FxHashMap::default(),
            streams: FxHashMap::default(),
            domains,
            externs,
            domain_stack: Vec::new(),
            computing: FxHashSet::default(),
            dirty: Vec::new(),
            dirty_set: FxHashSet::default(),
            outbox: Vec::new(),
            gc_queue: Vec::new(),
            next_sub_id: 0,
        }
    }

    /// Resolve a declaration's store-local identity, minting one on first
    /// use. Rejects declarations stamped by another store's domain setup.
    pub(crate) fn resolve_decl(
        &mut self,
        key: usize,
        keep: impl FnOnce() -> Box<dyn Any + Send + Sync>,
        meta: &DeclMeta,
    ) -> Result<NodeId, StoreError> {
        if let Some(owner) = meta.owner.get()
            && owner.store != self.store_id
        {
            return Err(StoreError::ForeignDeclaration {
                kind: meta.kind,
                name: meta.name.clone(),
            });
        }
        if let Some(entry) = self.decl_ids.get(&key) {
            return Ok(entry.id);
        }
        let id = self.ids.mint();
        self.decl_ids.insert(key, DeclEntry { id, keep: keep() });
        Ok(id)
    }

    /// The domain owning storages of this declaration: the stamping domain
    /// for nodes declared during a setup closure, the default domain
    /// otherwise.
    pub(crate) fn owner_domain(&mut self, meta: &DeclMeta) -> NodeId {
        match meta.owner.get() {
            Some(owner) if owner.store == self.store_id => {
                self.ensure_domain(owner.domain, || format!("domain{}", owner.domain));
                owner.domain
            }
            _ => NodeId::DEFAULT_DOMAIN,
        }
    }

    pub(crate) fn ensure_domain(&mut self, node: NodeId, name: impl FnOnce() -> String) {
        self.domains
            .entry(node)
            .or_insert_with(|| DomainStorage::new(name()));
    }

    pub(crate) fn retain_domain(&mut self, node: NodeId) {
        if let Some(domain) = self.domains.get_mut(&node) {
            domain.refs += 1;
        }
    }

    pub(crate) fn schedule(&mut self, target: GcTarget) {
        self.gc_queue.push(target);
    }

    pub(crate) fn mark_dirty(&mut self, key: StorageKey) {
        if self.dirty_set.insert(key.clone()) {
            self.dirty.push(key);
        }
    }

    pub(crate) fn alloc_sub_id(&mut self) -> u64 {
        let id = self.next_sub_id;
        self.next_sub_id += 1;
        id
    }
}
