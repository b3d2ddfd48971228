//! Domain resolution and the domain setup context.
//!
//! [`DomainCtx`] is lent by mutable reference to a domain's setup closure.
//! Its factories declare nodes owned by the domain (the storages they back
//! are destroyed together when the domain is collected), `get_domain`
//! resolves upstream domains and records the dependency edge, and
//! `get_extern` reads injected values. The borrow ends when setup returns,
//! so declaring nodes afterwards is unrepresentable.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;

use futures_util::stream::BoxStream;

use super::arena::{StoreCore, SubTarget};
use super::bridge;
use super::ctx::{ReadCtx, StreamCtx};
use crate::errors::StoreError;
use crate::nodes::{
    CommandDef, CommandOutput, DeclMeta, DeclOwner, DomainDef, ErasedStream, EventDef, ExternDef,
    QueryDef, StateDef, StreamDef,
};
use crate::types::NodeId;

/// Setup surface lent to a domain's setup closure.
pub struct DomainCtx<'a> {
    pub(crate) core: &'a mut StoreCore,
    pub(crate) domain: NodeId,
}

impl DomainCtx<'_> {
    /// Declare a state family owned by this domain.
    pub fn state<A, T>(
        &mut self,
        name: impl Into<String>,
        init: impl Fn(&A) -> T + Send + Sync + 'static,
    ) -> StateDef<A, T>
    where
        A: Send + Sync + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let def = StateDef::new(name, init);
        self.adopt(decl_key(&def.inner), Box::new(Arc::clone(&def.inner)), &def.inner.meta);
        def
    }

    /// Declare a state family with a custom compare function.
    pub fn state_with_compare<A, T>(
        &mut self,
        name: impl Into<String>,
        init: impl Fn(&A) -> T + Send + Sync + 'static,
        compare: impl Fn(&T, &T) -> bool + Send + Sync + 'static,
    ) -> StateDef<A, T>
    where
        A: Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let def = StateDef::with_compare(name, init, compare);
        self.adopt(decl_key(&def.inner), Box::new(Arc::clone(&def.inner)), &def.inner.meta);
        def
    }

    /// Declare a query family owned by this domain.
    pub fn query<A, T>(
        &mut self,
        name: impl Into<String>,
        run: impl Fn(&mut ReadCtx<'_>, &A) -> T + Send + Sync + 'static,
    ) -> QueryDef<A, T>
    where
        A: Send + Sync + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let def = QueryDef::new(name, run);
        self.adopt(decl_key(&def.inner), Box::new(Arc::clone(&def.inner)), &def.inner.meta);
        def
    }

    /// Declare a query family with a custom compare function.
    pub fn query_with_compare<A, T>(
        &mut self,
        name: impl Into<String>,
        run: impl Fn(&mut ReadCtx<'_>, &A) -> T + Send + Sync + 'static,
        compare: impl Fn(&T, &T) -> bool + Send + Sync + 'static,
    ) -> QueryDef<A, T>
    where
        A: Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let def = QueryDef::with_compare(name, run, compare);
        self.adopt(decl_key(&def.inner), Box::new(Arc::clone(&def.inner)), &def.inner.meta);
        def
    }

    /// Declare a verbatim-payload event owned by this domain.
    pub fn event<A>(&mut self, name: impl Into<String>) -> EventDef<A>
    where
        A: Clone + Send + Sync + 'static,
    {
        let def = EventDef::new(name);
        self.adopt(decl_key(&def.inner), Box::new(Arc::clone(&def.inner)), &def.inner.meta);
        def
    }

    /// Declare a computed-payload event owned by this domain.
    pub fn computed_event<A, T>(
        &mut self,
        name: impl Into<String>,
        run: impl Fn(&mut ReadCtx<'_>, &A) -> T + Send + Sync + 'static,
    ) -> EventDef<A, T>
    where
        A: Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let def = EventDef::computed(name, run);
        self.adopt(decl_key(&def.inner), Box::new(Arc::clone(&def.inner)), &def.inner.meta);
        def
    }

    /// Declare a command owned by this domain.
    pub fn command<A>(
        &mut self,
        name: impl Into<String>,
        run: impl Fn(&mut ReadCtx<'_>, &A) -> CommandOutput + Send + Sync + 'static,
    ) -> CommandDef<A>
    where
        A: Send + Sync + 'static,
    {
        let def = CommandDef::new(name, run);
        self.adopt(decl_key(&def.inner), Box::new(Arc::clone(&def.inner)), &def.inner.meta);
        def
    }

    /// Declare a command pipeline owned by this domain, ignited when the
    /// domain is first subscribed (or on first trigger, whichever comes
    /// first).
    pub fn command_stream<A>(
        &mut self,
        name: impl Into<String>,
        run: impl Fn(&mut StreamCtx<'_>, BoxStream<'static, A>) -> BoxStream<'static, CommandOutput>
        + Send
        + Sync
        + 'static,
    ) -> StreamDef<A>
    where
        A: Clone + Send + Sync + 'static,
    {
        let def = StreamDef::new(name, run);
        self.adopt(decl_key(&def.inner), Box::new(Arc::clone(&def.inner)), &def.inner.meta);
        if let Some(domain) = self.core.domains.get_mut(&self.domain) {
            domain.streams.push(Arc::clone(&def.inner) as _);
        }
        def
    }

    /// Resolve another domain, recording it as an upstream dependency of
    /// this one.
    ///
    /// # Panics
    ///
    /// Panics when the declaration belongs to a different store.
    pub fn get_domain<O>(&mut self, domain: &DomainDef<O>) -> O
    where
        O: Clone + Send + Sync + 'static,
    {
        match resolve_domain(self.core, domain) {
            Ok((_, output)) => output,
            Err(err) => panic!("loomstate: {err}"),
        }
    }

    /// Read an injected extern, falling back to the declared default when
    /// the store carries no binding for it.
    pub fn get_extern<T>(&self, extern_def: &ExternDef<T>) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        match self.core.externs.get(&extern_def.key()) {
            Some(slot) => slot
                .value
                .downcast_ref::<T>()
                .expect("extern binding type is fixed by the declaration")
                .clone(),
            None => extern_def.default_value(),
        }
    }

    fn adopt(&mut self, key: usize, keep: Box<dyn Any + Send + Sync>, meta: &DeclMeta) {
        let _ = meta.owner.set(DeclOwner {
            store: self.core.store_id,
            domain: self.domain,
        });
        // Freshly constructed declarations cannot be foreign.
        let _ = self.core.resolve_decl(key, || keep, meta);
    }
}

fn decl_key<T: ?Sized>(decl: &Arc<T>) -> usize {
    Arc::as_ptr(decl) as *const () as usize
}

/// Resolve a domain, running its setup closure on first access (or after a
/// teardown, when a surviving handle reaches it again).
pub(crate) fn resolve_domain<O>(
    core: &mut StoreCore,
    def: &DomainDef<O>,
) -> Result<(NodeId, O), StoreError>
where
    O: Clone + Send + Sync + 'static,
{
    let meta = &def.inner.meta;
    let node = core.resolve_decl(def.key(), || Box::new(def.keepalive()), meta)?;
    core.ensure_domain(node, || meta.name.clone());

    // A domain resolved while another domain's setup is executing becomes an
    // upstream dependency of the caller.
    if let Some(&caller) = core.domain_stack.last()
        && caller != node
    {
        if let Some(storage) = core.domains.get_mut(&node) {
            storage.downstream.insert(caller);
        }
        if let Some(storage) = core.domains.get_mut(&caller) {
            storage.upstream.insert(node);
        }
    }

    if let Some(output) = core.domains.get(&node).and_then(|d| d.output.clone()) {
        let output = output
            .downcast_ref::<O>()
            .expect("domain output type is fixed by the declaration")
            .clone();
        return Ok((node, output));
    }
    if core.domain_stack.contains(&node) {
        panic!(
            "loomstate: dependency cycle detected while instantiating Domain `{}`",
            meta.name
        );
    }

    tracing::debug!(domain = %meta.name, "instantiating domain");
    core.domain_stack.push(node);
    let setup = catch_unwind(AssertUnwindSafe(|| {
        let mut ctx = DomainCtx {
            core: &mut *core,
            domain: node,
        };
        (def.inner.setup)(&mut ctx)
    }));
    core.domain_stack.pop();
    let output = match setup {
        Ok(output) => output,
        Err(panic) => resume_unwind(panic),
    };
    if let Some(storage) = core.domains.get_mut(&node) {
        storage.output = Some(Arc::new(output.clone()));
    }
    Ok((node, output))
}

/// Subscribe a domain: bump its reference count and ignite the command
/// pipelines of the domain and its transitive upstream domains.
pub(crate) fn subscribe_domain_in<O>(
    core: &mut StoreCore,
    def: &DomainDef<O>,
) -> Result<SubTarget, StoreError>
where
    O: Clone + Send + Sync + 'static,
{
    let (node, _) = resolve_domain(core, def)?;
    core.retain_domain(node);
    ignite(core, node);
    Ok(SubTarget::Domain(node))
}

/// Start every not-yet-started pipeline reachable through the domain's
/// upstream closure. Idempotent.
pub(crate) fn ignite(core: &mut StoreCore, node: NodeId) {
    let mut pending = vec![node];
    let mut visited = rustc_hash::FxHashSet::default();
    while let Some(domain) = pending.pop() {
        if !visited.insert(domain) {
            continue;
        }
        let Some(storage) = core.domains.get(&domain) else {
            continue;
        };
        let streams: Vec<_> = storage.streams.iter().map(Arc::clone).collect();
        pending.extend(storage.upstream.iter().copied());
        for stream in streams {
            if let Err(err) = bridge::ensure_started(core, &stream) {
                tracing::warn!(stream = %stream.meta().name, error = %err, "pipeline ignition failed");
            }
        }
    }
}
