//! Domain declarations.
//!
//! A [`DomainDef`] bundles related state/query/event/command declarations
//! behind a setup closure. The closure runs once per store, on first
//! resolution, against a [`crate::store::DomainCtx`] lent by mutable
//! reference; the node-declaration surface must therefore be established
//! synchronously during setup; the borrow ends when the closure returns,
//! so late factory calls are unrepresentable. The closure's return value is
//! the domain's public surface, cached in the domain storage and cloned out
//! on every resolution.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::DeclMeta;
use crate::store::domains::DomainCtx;
use crate::types::NodeKind;

/// Declaration of a domain.
///
/// # Examples
///
/// ```rust
/// use loomstate::nodes::{CommandDef, DomainDef, QueryDef};
///
/// #[derive(Clone)]
/// struct CounterApi {
///     value: QueryDef<(), i32>,
///     incre: CommandDef<()>,
/// }
///
/// let counter: DomainDef<CounterApi> = DomainDef::new("counter", |ctx| {
///     let count = ctx.state("count", |_: &()| 0);
///     let value = ctx.query("value", {
///         let count = count.clone();
///         move |ctx, _: &()| ctx.get(&count.item())
///     });
///     let incre = ctx.command("incre", {
///         let count = count.clone();
///         move |ctx, _: &()| {
///             let current = ctx.get(&count.item());
///             count.item().set(current + 1)
///         }
///     });
///     CounterApi { value, incre }
/// });
/// # let _ = counter;
/// ```
pub struct DomainDef<O> {
    pub(crate) inner: Arc<DomainInner<O>>,
}

pub(crate) struct DomainInner<O> {
    pub(crate) meta: DeclMeta,
    pub(crate) setup: Box<dyn Fn(&mut DomainCtx<'_>) -> O + Send + Sync>,
}

impl<O> Clone for DomainDef<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O> fmt::Debug for DomainDef<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainDef({})", self.inner.meta.name)
    }
}

impl<O> DomainDef<O>
where
    O: Clone + Send + Sync + 'static,
{
    /// Declare a domain with its setup closure.
    pub fn new(
        name: impl Into<String>,
        setup: impl Fn(&mut DomainCtx<'_>) -> O + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(DomainInner {
                meta: DeclMeta::new(NodeKind::Domain, name),
                setup: Box::new(setup),
            }),
        }
    }

    /// The declared name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.inner.meta.name
    }

    /// Allocation identity of the declaration, stable for the life of the
    /// process; stores key domain storages by it.
    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// Keepalive handle registered alongside the identity key.
    pub(crate) fn keepalive(&self) -> Arc<dyn Any + Send + Sync> {
        Arc::clone(&self.inner) as Arc<dyn Any + Send + Sync>
    }
}
