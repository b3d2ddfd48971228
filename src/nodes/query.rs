//! Derived-value (query) declarations.
//!
//! A [`QueryDef`] declares a pull-evaluated derived value. Its body runs
//! against a tracking context whose `get` both returns a dependency's
//! current value and records the dependency edge, so the store knows exactly
//! which upstream storages to watch. Dependencies are dynamic: the edge set
//! is rebuilt from scratch on every recomputation, and a query may read
//! different sub-queries on different runs.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;

use super::{ArgValue, DeclMeta, ErasedQuery, ReadPayload, ReadRef, ReadSource};
use crate::store::ctx::ReadCtx;
use crate::types::{NodeKind, Value};

/// Declaration of a derived-value family.
///
/// The compare function (default `PartialEq::eq`) prunes invalidation: when
/// a recomputation produces a value equal to the cached one, propagation
/// stops at this query and subscribers are not notified. Recomputation cost
/// therefore tracks the actually-changed subgraph, not the whole graph.
///
/// # Examples
///
/// ```rust
/// use loomstate::nodes::{QueryDef, StateDef};
///
/// let count: StateDef<(), i32> = StateDef::new("count", |_| 0);
/// let doubled = QueryDef::new("doubled", {
///     let count = count.clone();
///     move |ctx, _: &()| ctx.get(&count.item()) * 2
/// });
/// # let _ = doubled;
/// ```
pub struct QueryDef<A, T> {
    pub(crate) inner: Arc<QueryInner<A, T>>,
}

pub(crate) struct QueryInner<A, T> {
    pub(crate) meta: DeclMeta,
    pub(crate) run: Box<dyn Fn(&mut ReadCtx<'_>, &A) -> T + Send + Sync>,
    pub(crate) compare: Box<dyn Fn(&T, &T) -> bool + Send + Sync>,
    pub(crate) nullary: OnceLock<ArgValue>,
}

impl<A, T> Clone for QueryDef<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, T> fmt::Debug for QueryDef<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryDef({})", self.inner.meta.name)
    }
}

impl<A, T> QueryDef<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Declare a query family with the default `PartialEq` compare.
    pub fn new(
        name: impl Into<String>,
        run: impl Fn(&mut ReadCtx<'_>, &A) -> T + Send + Sync + 'static,
    ) -> Self
    where
        T: PartialEq,
    {
        Self::with_compare(name, run, |prev, next| prev == next)
    }

    /// Declare a query family with a custom compare function.
    pub fn with_compare(
        name: impl Into<String>,
        run: impl Fn(&mut ReadCtx<'_>, &A) -> T + Send + Sync + 'static,
        compare: impl Fn(&T, &T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(QueryInner {
                meta: DeclMeta::new(NodeKind::Query, name),
                run: Box::new(run),
                compare: Box::new(compare),
                nullary: OnceLock::new(),
            }),
        }
    }

    /// The declared name, used in diagnostics and storage keys.
    pub fn name(&self) -> &str {
        &self.inner.meta.name
    }

    /// Build the instance for one concrete argument.
    pub fn with(&self, arg: A) -> QueryItem<A, T>
    where
        A: Serialize,
    {
        QueryItem {
            inner: Arc::clone(&self.inner),
            arg: ArgValue::keyed(arg),
        }
    }
}

impl<T> QueryDef<(), T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The argument-less instance, memoized on the declaration.
    pub fn item(&self) -> QueryItem<(), T> {
        let arg = self.inner.nullary.get_or_init(ArgValue::nullary).clone();
        QueryItem {
            inner: Arc::clone(&self.inner),
            arg,
        }
    }
}

/// One query instance: a declaration paired with a canonicalized argument.
pub struct QueryItem<A, T> {
    pub(crate) inner: Arc<QueryInner<A, T>>,
    pub(crate) arg: ArgValue,
}

impl<A, T> Clone for QueryItem<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            arg: self.arg.clone(),
        }
    }
}

impl<A, T> fmt::Debug for QueryItem<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryItem({}, {:?})", self.inner.meta.name, self.arg)
    }
}

impl<A, T> QueryItem<A, T> {
    /// `true` when both handles are the same instance token.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) && Arc::ptr_eq(&self.arg.any, &other.arg.any)
    }
}

impl<A, T> ReadPayload for QueryItem<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn read_ref(&self) -> ReadRef {
        let decl: Arc<dyn ErasedQuery> = Arc::clone(&self.inner) as _;
        ReadRef(ReadSource::Query {
            decl,
            arg: self.arg.clone(),
        })
    }
}

impl<A, T> ErasedQuery for QueryInner<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn meta(&self) -> &DeclMeta {
        &self.meta
    }

    fn eval(&self, ctx: &mut ReadCtx<'_>, arg: &dyn Any) -> Value {
        let arg = arg
            .downcast_ref::<A>()
            .expect("query argument type is fixed by the declaration");
        Arc::new((self.run)(ctx, arg))
    }

    fn compare(&self, prev: &dyn Any, next: &dyn Any) -> bool {
        match (prev.downcast_ref::<T>(), next.downcast_ref::<T>()) {
            (Some(prev), Some(next)) => (self.compare)(prev, next),
            _ => false,
        }
    }
}
