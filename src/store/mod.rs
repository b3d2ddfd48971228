//! The reactive store: public operations over the dependency graph.
//!
//! A [`Store`] owns every storage created from the declarations used with
//! it: state cells, query caches, event channels, command pipelines, and
//! domain bundles. Execution is single-threaded, synchronous, and
//! run-to-completion: each public operation locks the core, runs its
//! cascade and collection to a fixed point, and only then delivers
//! subscriber notifications, outside the lock. Asynchronous pipelines
//! re-enter through the same surface and therefore serialize behind any
//! in-flight cascade.
//!
//! # Examples
//!
//! ```rust
//! use loomstate::nodes::{CommandDef, StateDef};
//! use loomstate::store::Store;
//!
//! let count: StateDef<(), i32> = StateDef::new("count", |_| 0);
//! let incre = CommandDef::new("incre", {
//!     let count = count.clone();
//!     move |ctx, _: &()| {
//!         let current = ctx.get(&count.item());
//!         count.item().set(current + 1)
//!     }
//! });
//!
//! let store = Store::new();
//! store.send_command(&incre.item())?;
//! store.send_command(&incre.item())?;
//! assert_eq!(store.query(&count.item())?, 2);
//! # Ok::<(), loomstate::StoreError>(())
//! ```

pub(crate) mod arena;
pub(crate) mod bridge;
pub mod ctx;
pub(crate) mod dispatch;
pub mod domains;
pub(crate) mod gc;
pub(crate) mod invalidate;
pub mod subscription;

pub use ctx::{ReadCtx, StreamCtx};
pub use domains::DomainCtx;
pub use subscription::Subscription;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use self::arena::{OutboxItem, StoreCore, SubTarget, Subscriber};
use crate::errors::StoreError;
use crate::nodes::{
    DispatchPayload, DispatchRef, DispatchTarget, DomainDef, ErasedCommand, ErasedEvent,
    ErasedQuery, EventDef, EventItem, ExternBinding, QueryItem, ReadPayload, ReadRef,
};
use crate::types::Value;

// ============================================================================
// Construction
// ============================================================================

/// Construction-time configuration: a diagnostic name plus extern bindings.
///
/// # Examples
///
/// ```rust
/// use loomstate::nodes::ExternDef;
/// use loomstate::store::{Store, StoreOptions};
///
/// let page_size: ExternDef<usize> = ExternDef::new("page_size", 25);
/// let store = Store::with_options(
///     StoreOptions::new()
///         .with_name("app")
///         .with_extern(page_size.bind(100)),
/// );
/// assert_eq!(store.name(), "app");
/// ```
pub struct StoreOptions {
    pub(crate) name: String,
    pub(crate) externs: Vec<ExternBinding>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self {
            name: "loomstate".to_string(),
            externs: Vec::new(),
        }
    }

    /// Set the diagnostic store name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add an extern binding consulted by `get_extern`.
    #[must_use]
    pub fn with_extern(mut self, binding: ExternBinding) -> Self {
        self.externs.push(binding);
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct StoreInner {
    pub(crate) name: String,
    pub(crate) id: Uuid,
    pub(crate) core: Mutex<StoreCore>,
}

/// A reactive store instance. Cheap to clone; clones share the same core.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Store({}, {})", self.inner.name, self.inner.id)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Create a store with default options.
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    /// Create a store with explicit options.
    pub fn with_options(options: StoreOptions) -> Self {
        let id = Uuid::new_v4();
        let name = options.name;
        let externs = options.externs;
        let inner = Arc::new_cyclic(|weak| StoreInner {
            name: name.clone(),
            id,
            core: Mutex::new(StoreCore::new(name.clone(), id, weak.clone(), externs)),
        });
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    /// The diagnostic store name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The store's unique id.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Resolve a domain, running its setup on first access, and return its
    /// declared surface.
    pub fn get_domain<O>(&self, domain: &DomainDef<O>) -> Result<O, StoreError>
    where
        O: Clone + Send + Sync + 'static,
    {
        self.with_core(|core| domains::resolve_domain(core, domain).map(|(_, output)| output))
    }

    /// One-shot read of a state or query instance, creating its storage if
    /// needed. A query's cached value is never stale once committed, so an
    /// existing storage answers without recomputation.
    pub fn query<P: ReadPayload>(&self, payload: &P) -> Result<P::Value, StoreError> {
        self.with_core(|core| {
            let ReadRef(source) = payload.read_ref();
            let mut ctx = ctx::ReadCtx::untracked(core);
            let value = ctx::read_value(&mut ctx, &source)?;
            Ok(value
                .downcast_ref::<P::Value>()
                .expect("value type is fixed by the declaration")
                .clone())
        })
    }

    /// Subscribe to a query instance's committed changes.
    ///
    /// The callback fires at most once per settled cascade, with the final
    /// value; it does not fire at subscription time.
    pub fn subscribe_query<A, T>(
        &self,
        query: &QueryItem<A, T>,
        on_change: impl Fn(&T) + Send + Sync + 'static,
    ) -> Result<Subscription, StoreError>
    where
        A: Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let (target, id) = self.with_core(|core| {
            let decl: Arc<dyn ErasedQuery> = Arc::clone(&query.inner) as _;
            let key = ctx::query_storage(core, &decl, &query.arg)?;
            let id = core.alloc_sub_id();
            let subscriber: Subscriber = Arc::new(move |value: &Value| {
                if let Some(value) = value.downcast_ref::<T>() {
                    on_change(value);
                }
            });
            let owner = {
                let storage = core
                    .queries
                    .get_mut(&key)
                    .expect("storage just resolved");
                storage.subscribers.push((id, subscriber));
                storage.owner
            };
            core.retain_domain(owner);
            Ok((SubTarget::Query(key), id))
        })?;
        Ok(Subscription::new(Arc::downgrade(&self.inner), target, id))
    }

    /// Subscribe to an event declaration's emissions.
    pub fn subscribe_event<A, T>(
        &self,
        event: &EventDef<A, T>,
        on_event: impl Fn(&T) + Send + Sync + 'static,
    ) -> Result<Subscription, StoreError>
    where
        A: Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let (target, id) = self.with_core(|core| {
            let decl: Arc<dyn ErasedEvent> = Arc::clone(&event.inner) as _;
            let node = ctx::event_storage(core, &decl)?;
            let id = core.alloc_sub_id();
            let subscriber: Subscriber = Arc::new(move |value: &Value| {
                if let Some(value) = value.downcast_ref::<T>() {
                    on_event(value);
                }
            });
            let owner = {
                let storage = core
                    .events
                    .get_mut(&node)
                    .expect("storage just resolved");
                storage.subscribers.push((id, subscriber));
                storage.owner
            };
            core.retain_domain(owner);
            Ok((SubTarget::Event(node), id))
        })?;
        Ok(Subscription::new(Arc::downgrade(&self.inner), target, id))
    }

    /// Subscribe a domain, keeping it and its transitive upstream domains
    /// alive, and igniting their command pipelines.
    pub fn subscribe_domain<O>(&self, domain: &DomainDef<O>) -> Result<Subscription, StoreError>
    where
        O: Clone + Send + Sync + 'static,
    {
        let (target, id) = self.with_core(|core| {
            let target = domains::subscribe_domain_in(core, domain)?;
            Ok((target, core.alloc_sub_id()))
        })?;
        Ok(Subscription::new(Arc::downgrade(&self.inner), target, id))
    }

    /// Publish an event. Computed-payload events evaluate their body at the
    /// emission point; emitting with zero subscribers is a no-op beyond
    /// bookkeeping.
    pub fn emit_event<A, T>(&self, event: &EventItem<A, T>) -> Result<(), StoreError>
    where
        A: Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
    {
        self.with_core(|core| {
            let decl: Arc<dyn ErasedEvent> = Arc::clone(&event.inner) as _;
            dispatch::apply_emit(core, &decl, &event.arg)
        })
    }

    /// Dispatch a command or trigger a command pipeline.
    ///
    /// Flattened effects apply strictly in declared order; every dirty query
    /// notifies its subscribers exactly once, after the cascade settles.
    /// Panics raised by command bodies propagate to this caller; effects
    /// already applied before the panic stay committed.
    pub fn send_command<P: DispatchPayload>(&self, payload: &P) -> Result<(), StoreError> {
        let DispatchRef(target) = payload.dispatch_ref();
        self.with_core(|core| match target {
            DispatchTarget::Command { decl, arg } => {
                // Commands have no storage; the ownership check happens here.
                core.resolve_decl(
                    Arc::as_ptr(&decl) as *const () as usize,
                    || Box::new(Arc::clone(&decl)),
                    decl.meta(),
                )?;
                let output = dispatch::run_command(core, &decl, &arg);
                dispatch::apply_output(core, output)
            }
            DispatchTarget::Stream { decl, arg } => bridge::trigger(core, &decl, &arg),
        })
    }

    /// Stable cache key for a state or query instance, for adapter layers
    /// keying UI subscriptions: `"{kind}:{name}:{argument-json}"`.
    pub fn get_key<P: ReadPayload>(&self, payload: &P) -> Result<String, StoreError> {
        let read = payload.read_ref();
        let meta = read.meta();
        match &read.arg().canonical {
            Ok(arg) => Ok(format!("{}:{}:{}", meta.kind, meta.name, arg)),
            Err(message) => Err(StoreError::ArgKey {
                kind: meta.kind,
                name: meta.name.clone(),
                message: message.clone(),
            }),
        }
    }

    /// Tear down every storage unconditionally: abort pipelines, drop
    /// subscribers, clear the arenas. Subsequent operations return
    /// [`StoreError::Destroyed`].
    pub fn destroy(&self) {
        let _entered = reentry::enter(self.inner.id, &self.inner.name);
        let mut core = self.inner.core.lock();
        if core.destroyed {
            return;
        }
        core.destroyed = true;
        tracing::debug!(store = %self.inner.name, "destroying store");
        for storage in core.streams.values_mut() {
            if let Some(task) = storage.task.take() {
                task.abort();
            }
            storage.sender = None;
        }
        core.streams.clear();
        core.states.clear();
        core.queries.clear();
        core.events.clear();
        core.domains.clear();
        core.externs.clear();
        core.decl_ids.clear();
        core.dirty.clear();
        core.dirty_set.clear();
        core.gc_queue.clear();
        // Pending notifications die with the store.
        core.outbox.clear();
    }

    // ========================================================================
    // Internal entry points
    // ========================================================================

    /// Apply a pipeline-produced effect; a fresh external call.
    pub(crate) fn dispatch_output(
        &self,
        output: crate::nodes::CommandOutput,
    ) -> Result<(), StoreError> {
        self.with_core(|core| dispatch::apply_output(core, output))
    }

    pub(crate) fn release_subscription(&self, target: &SubTarget, id: u64) {
        // Releasing after destroy is a no-op.
        let _ = self.with_core(|core| {
            gc::release_subscriber(core, target, id);
            Ok(())
        });
    }

    /// Lock the core, run one operation plus its commit phase, then deliver
    /// queued notifications outside the lock.
    fn with_core<R>(
        &self,
        f: impl FnOnce(&mut StoreCore) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let (outcome, outbox) = {
            let _entered = reentry::enter(self.inner.id, &self.inner.name);
            let mut core = self.inner.core.lock();
            if core.destroyed {
                return Err(StoreError::Destroyed {
                    store: self.inner.name.clone(),
                });
            }
            let outcome = f(&mut core);
            invalidate::commit(&mut core);
            (outcome, std::mem::take(&mut core.outbox))
        };
        deliver(outbox);
        outcome
    }
}

fn deliver(outbox: Vec<OutboxItem>) {
    for item in outbox {
        match item {
            OutboxItem::Notify { subscriber, value } => (subscriber.as_ref())(&value),
        }
    }
}

mod reentry {
    //! Same-thread re-entrancy detection. A node implementation calling back
    //! into its own store would deadlock on the core lock; failing fast with
    //! a named store is diagnosable, a silent deadlock is not.

    use std::cell::RefCell;

    use uuid::Uuid;

    thread_local! {
        static ACTIVE: RefCell<Vec<Uuid>> = const { RefCell::new(Vec::new()) };
    }

    pub(super) struct Entered {
        id: Uuid,
    }

    pub(super) fn enter(id: Uuid, name: &str) -> Entered {
        ACTIVE.with(|active| {
            if active.borrow().contains(&id) {
                panic!(
                    "loomstate: store `{name}` called re-entrantly from inside a node \
                     implementation; read through the provided context instead"
                );
            }
            active.borrow_mut().push(id);
        });
        Entered { id }
    }

    impl Drop for Entered {
        fn drop(&mut self) {
            ACTIVE.with(|active| {
                let mut active = active.borrow_mut();
                if let Some(pos) = active.iter().rposition(|entry| *entry == self.id) {
                    active.remove(pos);
                }
            });
        }
    }
}
