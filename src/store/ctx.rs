//! Tracking contexts handed to node implementations.
//!
//! [`ReadCtx`] is the read surface for query bodies, command bodies, and
//! computed event payloads. Its [`ReadCtx::get`] returns a dependency's
//! current value and, when evaluating a query, records the upstream edge
//! and its symmetric downstream edge, so invalidation knows exactly which
//! storages to revisit. [`StreamCtx`] is the pipeline-setup surface, adding
//! `from_query` / `from_event` adapters that turn live storages into
//! asynchronous streams.
//!
//! Misusing a context (unserializable keyed argument, a declaration from
//! another store, a dependency cycle) is a programming error and panics with
//! a message naming the offending declaration.

use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use super::arena::{
    EventStorage, InternalSub, QueryStorage, StateStorage, StoreCore, SubTarget, Subscriber,
};
use crate::errors::StoreError;
use crate::nodes::{
    ArgValue, ErasedEvent, ErasedQuery, ErasedState, EventDef, QueryItem, ReadPayload, ReadRef,
    ReadSource,
};
use crate::types::{NodeId, SourceRef, StorageKey, Value};

/// Read surface for node implementations.
///
/// Obtained only from the store: query bodies, command bodies, and computed
/// event payloads receive one; it cannot be constructed by user code.
pub struct ReadCtx<'a> {
    pub(crate) core: &'a mut StoreCore,
    /// The query storage being evaluated, when this context tracks edges.
    pub(crate) consumer: Option<StorageKey>,
    pub(crate) reads: Vec<SourceRef>,
}

impl<'a> ReadCtx<'a> {
    pub(crate) fn tracking(core: &'a mut StoreCore, consumer: StorageKey) -> Self {
        Self {
            core,
            consumer: Some(consumer),
            reads: Vec::new(),
        }
    }

    pub(crate) fn untracked(core: &'a mut StoreCore) -> Self {
        Self {
            core,
            consumer: None,
            reads: Vec::new(),
        }
    }

    /// Read a state or query instance's current value.
    ///
    /// Inside a query body this also records the dependency edge; the edge
    /// set is rebuilt on every recomputation, so conditional reads work as
    /// expected.
    ///
    /// # Panics
    ///
    /// Panics when the instance's argument cannot be canonicalized, when the
    /// declaration belongs to another store, or when the read closes a
    /// dependency cycle.
    pub fn get<P: ReadPayload>(&mut self, payload: &P) -> P::Value {
        let ReadRef(source) = payload.read_ref();
        let value = match read_value(self, &source) {
            Ok(value) => value,
            Err(err) => panic!("loomstate: {err}"),
        };
        value
            .downcast_ref::<P::Value>()
            .expect("value type is fixed by the declaration")
            .clone()
    }
}

pub(crate) fn read_value(
    ctx: &mut ReadCtx<'_>,
    source: &ReadSource,
) -> Result<Value, StoreError> {
    match source {
        ReadSource::State { decl, arg } => {
            let key = state_storage(ctx.core, decl, arg)?;
            track(ctx, SourceRef::State(key.clone()));
            Ok(Arc::clone(
                &ctx.core.states.get(&key).expect("storage just resolved").value,
            ))
        }
        ReadSource::Query { decl, arg } => {
            let key = query_storage(ctx.core, decl, arg)?;
            track(ctx, SourceRef::Query(key.clone()));
            Ok(Arc::clone(
                &ctx.core
                    .queries
                    .get(&key)
                    .expect("storage just resolved")
                    .value,
            ))
        }
    }
}

fn track(ctx: &mut ReadCtx<'_>, source: SourceRef) {
    let Some(consumer) = ctx.consumer.clone() else {
        return;
    };
    match &source {
        SourceRef::State(key) => {
            if let Some(storage) = ctx.core.states.get_mut(key) {
                storage.downstream.insert(consumer);
            }
        }
        SourceRef::Query(key) => {
            if let Some(storage) = ctx.core.queries.get_mut(key) {
                storage.downstream.insert(consumer);
            }
        }
    }
    ctx.reads.push(source);
}

fn decl_key<T: ?Sized>(decl: &Arc<T>) -> usize {
    Arc::as_ptr(decl) as *const () as usize
}

fn storage_key(
    core: &mut StoreCore,
    key: usize,
    keep: impl FnOnce() -> Box<dyn std::any::Any + Send + Sync>,
    meta: &crate::nodes::DeclMeta,
    arg: &ArgValue,
) -> Result<StorageKey, StoreError> {
    let node = core.resolve_decl(key, keep, meta)?;
    let canonical = arg.canonical.clone().map_err(|message| StoreError::ArgKey {
        kind: meta.kind,
        name: meta.name.clone(),
        message,
    })?;
    Ok(StorageKey::new(node, canonical))
}

/// Resolve (creating lazily) the storage behind a state instance.
pub(crate) fn state_storage(
    core: &mut StoreCore,
    decl: &Arc<dyn ErasedState>,
    arg: &ArgValue,
) -> Result<StorageKey, StoreError> {
    let meta = decl.meta();
    let key = storage_key(
        core,
        decl_key(decl),
        || Box::new(Arc::clone(decl)),
        meta,
        arg,
    )?;
    if !core.states.contains_key(&key) {
        let owner = core.owner_domain(meta);
        let value = decl.init(arg.any.as_ref());
        tracing::trace!(state = %meta.name, key = %key, "state storage created");
        core.states.insert(
            key.clone(),
            StateStorage {
                decl: Arc::clone(decl),
                value,
                downstream: Default::default(),
                owner,
            },
        );
        if let Some(domain) = core.domains.get_mut(&owner) {
            domain.owned_states.insert(key.clone());
        }
    }
    Ok(key)
}

/// Resolve (creating and evaluating lazily) the storage behind a query
/// instance.
pub(crate) fn query_storage(
    core: &mut StoreCore,
    decl: &Arc<dyn ErasedQuery>,
    arg: &ArgValue,
) -> Result<StorageKey, StoreError> {
    let meta = decl.meta();
    let key = storage_key(
        core,
        decl_key(decl),
        || Box::new(Arc::clone(decl)),
        meta,
        arg,
    )?;
    if core.queries.contains_key(&key) {
        return Ok(key);
    }
    let owner = core.owner_domain(meta);
    let (value, reads) = evaluate(core, decl, &arg.any, &key);
    tracing::trace!(query = %meta.name, key = %key, deps = reads.len(), "query storage created");
    core.queries.insert(
        key.clone(),
        QueryStorage {
            decl: Arc::clone(decl),
            arg: Arc::clone(&arg.any),
            value,
            upstream: reads.into_iter().collect(),
            downstream: Default::default(),
            subscribers: Vec::new(),
            owner,
        },
    );
    if let Some(domain) = core.domains.get_mut(&owner) {
        domain.owned_queries.insert(key.clone());
    }
    Ok(key)
}

/// Run a query body against a fresh tracking context, with cycle detection
/// and unwind-safe bookkeeping.
pub(crate) fn evaluate(
    core: &mut StoreCore,
    decl: &Arc<dyn ErasedQuery>,
    arg: &Value,
    key: &StorageKey,
) -> (Value, Vec<SourceRef>) {
    if !core.computing.insert(key.clone()) {
        panic!(
            "loomstate: dependency cycle detected while evaluating {}",
            decl.meta().describe()
        );
    }
    let evaluated = catch_unwind(AssertUnwindSafe(|| {
        let mut ctx = ReadCtx::tracking(core, key.clone());
        let value = decl.eval(&mut ctx, arg.as_ref());
        (value, ctx.reads)
    }));
    core.computing.remove(key);
    match evaluated {
        Ok(result) => result,
        Err(panic) => resume_unwind(panic),
    }
}

/// Resolve (creating lazily) the channel storage behind an event
/// declaration.
pub(crate) fn event_storage(
    core: &mut StoreCore,
    decl: &Arc<dyn ErasedEvent>,
) -> Result<NodeId, StoreError> {
    let meta = decl.meta();
    let node = core.resolve_decl(decl_key(decl), || Box::new(Arc::clone(decl)), meta)?;
    if !core.events.contains_key(&node) {
        let owner = core.owner_domain(meta);
        core.events.insert(
            node,
            EventStorage {
                decl: Arc::clone(decl),
                subscribers: Vec::new(),
                owner,
            },
        );
        if let Some(domain) = core.domains.get_mut(&owner) {
            domain.owned_events.insert(node);
        }
    }
    Ok(node)
}

/// Pipeline-setup surface: reads plus storage-to-stream adapters.
///
/// The adapters subscribe internally; those subscriptions keep the source
/// storages alive for as long as the pipeline runs and are released when the
/// pipeline is torn down.
pub struct StreamCtx<'a> {
    pub(crate) core: &'a mut StoreCore,
    pub(crate) subs: Vec<InternalSub>,
}

impl StreamCtx<'_> {
    /// Read a state or query instance's current value, without tracking.
    pub fn get<P: ReadPayload>(&mut self, payload: &P) -> P::Value {
        let mut ctx = ReadCtx::untracked(self.core);
        ctx.get(payload)
    }

    /// A stream of the query's committed values, one element per settled
    /// cascade in which the value changed.
    pub fn from_query<A, T>(&mut self, query: &QueryItem<A, T>) -> BoxStream<'static, T>
    where
        A: Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let decl: Arc<dyn ErasedQuery> = Arc::clone(&query.inner) as _;
        let key = match query_storage(self.core, &decl, &query.arg) {
            Ok(key) => key,
            Err(err) => panic!("loomstate: {err}"),
        };
        let (tx, rx) = flume::unbounded::<T>();
        let id = self.core.alloc_sub_id();
        let subscriber: Subscriber = Arc::new(move |value: &Value| {
            if let Some(value) = value.downcast_ref::<T>() {
                let _ = tx.send(value.clone());
            }
        });
        // Internal subscriptions pin the storage, not the owning domain;
        // a pipeline feeding on its own domain must not keep it alive.
        self.core
            .queries
            .get_mut(&key)
            .expect("storage just resolved")
            .subscribers
            .push((id, subscriber));
        self.subs.push(InternalSub {
            target: SubTarget::Query(key),
            id,
        });
        rx.into_stream().boxed()
    }

    /// A stream of the event's delivered payloads.
    pub fn from_event<A, T>(&mut self, event: &EventDef<A, T>) -> BoxStream<'static, T>
    where
        A: Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let decl: Arc<dyn ErasedEvent> = Arc::clone(&event.inner) as _;
        let node = match event_storage(self.core, &decl) {
            Ok(node) => node,
            Err(err) => panic!("loomstate: {err}"),
        };
        let (tx, rx) = flume::unbounded::<T>();
        let id = self.core.alloc_sub_id();
        let subscriber: Subscriber = Arc::new(move |value: &Value| {
            if let Some(value) = value.downcast_ref::<T>() {
                let _ = tx.send(value.clone());
            }
        });
        self.core
            .events
            .get_mut(&node)
            .expect("storage just resolved")
            .subscribers
            .push((id, subscriber));
        self.subs.push(InternalSub {
            target: SubTarget::Event(node),
            id,
        });
        rx.into_stream().boxed()
    }
}
