//! Writable state declarations.
//!
//! A [`StateDef`] declares one keyed family of writable value cells. The
//! declaration carries an initializer (run lazily on first read of each
//! instance) and a compare function deciding whether a write is a no-op.
//! Writes happen exclusively through dispatched command effects (see
//! [`StateItem::set`]), never by direct mutation.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;

use super::output::{CommandOutput, StateWrite};
use super::{ArgValue, DeclMeta, ErasedState, ReadPayload, ReadRef, ReadSource};
use crate::types::{NodeKind, Value};

/// Declaration of a writable state cell family.
///
/// The default compare function is `PartialEq::eq`; writes whose new value
/// compares equal to the current value do not invalidate downstream queries
/// and do not notify subscribers. Supply a custom compare with
/// [`StateDef::with_compare`] when a coarser notion of "unchanged" fits the
/// value type.
///
/// # Examples
///
/// ```rust
/// use loomstate::nodes::StateDef;
///
/// // Default compare: PartialEq.
/// let count: StateDef<(), i32> = StateDef::new("count", |_| 0);
///
/// // Custom compare: only the id is significant.
/// let selection: StateDef<(), (u64, String)> = StateDef::with_compare(
///     "selection",
///     |_| (0, String::new()),
///     |prev, next| prev.0 == next.0,
/// );
/// # let _ = (count, selection);
/// ```
pub struct StateDef<A, T> {
    pub(crate) inner: Arc<StateInner<A, T>>,
}

pub(crate) struct StateInner<A, T> {
    pub(crate) meta: DeclMeta,
    pub(crate) init: Box<dyn Fn(&A) -> T + Send + Sync>,
    pub(crate) compare: Box<dyn Fn(&T, &T) -> bool + Send + Sync>,
    pub(crate) nullary: OnceLock<ArgValue>,
}

impl<A, T> Clone for StateDef<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, T> fmt::Debug for StateDef<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateDef({})", self.inner.meta.name)
    }
}

impl<A, T> StateDef<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Declare a state family with the default `PartialEq` compare.
    pub fn new(
        name: impl Into<String>,
        init: impl Fn(&A) -> T + Send + Sync + 'static,
    ) -> Self
    where
        T: PartialEq,
    {
        Self::with_compare(name, init, |prev, next| prev == next)
    }

    /// Declare a state family with a custom compare function.
    ///
    /// The compare function receives `(previous, next)` and returns `true`
    /// when the write should be suppressed as a no-op.
    pub fn with_compare(
        name: impl Into<String>,
        init: impl Fn(&A) -> T + Send + Sync + 'static,
        compare: impl Fn(&T, &T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(StateInner {
                meta: DeclMeta::new(NodeKind::State, name),
                init: Box::new(init),
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
    ///
    /// Structurally equal arguments canonicalize to the same storage key and
    /// resolve to the same storage inside a store.
    pub fn with(&self, arg: A) -> StateItem<A, T>
    where
        A: Serialize,
    {
        StateItem {
            inner: Arc::clone(&self.inner),
            arg: ArgValue::keyed(arg),
        }
    }
}

impl<T> StateDef<(), T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The argument-less instance, memoized on the declaration so repeated
    /// calls return a referentially identical token without serialization.
    pub fn item(&self) -> StateItem<(), T> {
        let arg = self.inner.nullary.get_or_init(ArgValue::nullary).clone();
        StateItem {
            inner: Arc::clone(&self.inner),
            arg,
        }
    }
}

/// One state instance: a declaration paired with a canonicalized argument.
pub struct StateItem<A, T> {
    pub(crate) inner: Arc<StateInner<A, T>>,
    pub(crate) arg: ArgValue,
}

impl<A, T> Clone for StateItem<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            arg: self.arg.clone(),
        }
    }
}

impl<A, T> fmt::Debug for StateItem<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateItem({}, {:?})", self.inner.meta.name, self.arg)
    }
}

impl<A, T> StateItem<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Build the write effect for this instance.
    ///
    /// The write applies when the surrounding command dispatch reaches this
    /// leaf; the declaration's compare function decides whether it is a
    /// no-op.
    pub fn set(&self, value: T) -> CommandOutput {
        let decl: Arc<dyn ErasedState> = Arc::clone(&self.inner) as _;
        CommandOutput::SetState(StateWrite {
            decl,
            arg: self.arg.clone(),
            value: Arc::new(value),
        })
    }

    /// `true` when both handles are the same instance token (same
    /// declaration and the same memoized argument allocation).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) && Arc::ptr_eq(&self.arg.any, &other.arg.any)
    }
}

impl<A, T> ReadPayload for StateItem<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn read_ref(&self) -> ReadRef {
        let decl: Arc<dyn ErasedState> = Arc::clone(&self.inner) as _;
        ReadRef(ReadSource::State {
            decl,
            arg: self.arg.clone(),
        })
    }
}

impl<A, T> ErasedState for StateInner<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn meta(&self) -> &DeclMeta {
        &self.meta
    }

    fn init(&self, arg: &dyn Any) -> Value {
        let arg = arg
            .downcast_ref::<A>()
            .expect("state argument type is fixed by the declaration");
        Arc::new((self.init)(arg))
    }

    fn compare(&self, prev: &dyn Any, next: &dyn Any) -> bool {
        match (prev.downcast_ref::<T>(), next.downcast_ref::<T>()) {
            (Some(prev), Some(next)) => (self.compare)(prev, next),
            _ => false,
        }
    }
}
