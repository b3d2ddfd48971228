//! Event declarations.
//!
//! An [`EventDef`] declares a pub/sub channel. A plain event emits its
//! payload verbatim; a computed event evaluates its body against a read-only
//! context at emission time to produce the value delivered to subscribers.
//! Emitting with zero subscribers is legal and a no-op beyond bookkeeping.

use std::fmt;
use std::sync::{Arc, OnceLock};

use super::output::{CommandOutput, EventEmit};
use super::{DeclMeta, ErasedEvent};
use crate::store::ctx::ReadCtx;
use crate::types::{NodeKind, Value};

/// Declaration of an event channel.
///
/// # Examples
///
/// ```rust
/// use loomstate::nodes::{EventDef, StateDef};
///
/// // Verbatim payload: subscribers receive the emitted argument.
/// let saved: EventDef<String> = EventDef::new("saved");
///
/// // Computed payload: the body reads store values at emission time.
/// let count: StateDef<(), i32> = StateDef::new("count", |_| 0);
/// let reported: EventDef<(), i32> = EventDef::computed("reported", {
///     let count = count.clone();
///     move |ctx, _| ctx.get(&count.item())
/// });
/// # let _ = (saved, reported);
/// ```
pub struct EventDef<A, T = A> {
    pub(crate) inner: Arc<EventInner<A, T>>,
}

pub(crate) struct EventInner<A, T> {
    pub(crate) meta: DeclMeta,
    pub(crate) run: Option<Box<dyn Fn(&mut ReadCtx<'_>, &A) -> T + Send + Sync>>,
    pub(crate) nullary: OnceLock<Value>,
}

impl<A, T> Clone for EventDef<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, T> fmt::Debug for EventDef<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventDef({})", self.inner.meta.name)
    }
}

impl<A> EventDef<A, A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Declare an event whose payload is emitted verbatim.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventInner {
                meta: DeclMeta::new(NodeKind::Event, name),
                run: None,
                nullary: OnceLock::new(),
            }),
        }
    }
}

impl<A, T> EventDef<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Declare an event whose delivered value is computed at emission time.
    pub fn computed(
        name: impl Into<String>,
        run: impl Fn(&mut ReadCtx<'_>, &A) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(EventInner {
                meta: DeclMeta::new(NodeKind::Event, name),
                run: Some(Box::new(run)),
                nullary: OnceLock::new(),
            }),
        }
    }

    /// The declared name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.inner.meta.name
    }

    /// Build the emission payload for one concrete argument.
    pub fn with(&self, arg: A) -> EventItem<A, T> {
        EventItem {
            inner: Arc::clone(&self.inner),
            arg: Arc::new(arg),
        }
    }

    /// Build the emit effect directly; sugar for `def.with(arg).emit()`.
    pub fn emit(&self, arg: A) -> CommandOutput {
        self.with(arg).emit()
    }
}

impl<T> EventDef<(), T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The argument-less payload, memoized on the declaration.
    pub fn item(&self) -> EventItem<(), T> {
        let arg = self.inner.nullary.get_or_init(|| Arc::new(())).clone();
        EventItem {
            inner: Arc::clone(&self.inner),
            arg,
        }
    }
}

/// One event emission payload: a declaration paired with an argument.
pub struct EventItem<A, T = A> {
    pub(crate) inner: Arc<EventInner<A, T>>,
    pub(crate) arg: Value,
}

impl<A, T> Clone for EventItem<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            arg: Arc::clone(&self.arg),
        }
    }
}

impl<A, T> fmt::Debug for EventItem<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventItem({})", self.inner.meta.name)
    }
}

impl<A, T> EventItem<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Build the emit effect for this payload.
    pub fn emit(&self) -> CommandOutput {
        let decl: Arc<dyn ErasedEvent> = Arc::clone(&self.inner) as _;
        CommandOutput::EmitEvent(EventEmit {
            decl,
            arg: Arc::clone(&self.arg),
        })
    }

    /// `true` when both handles are the same instance token.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) && Arc::ptr_eq(&self.arg, &other.arg)
    }
}

impl<A, T> ErasedEvent for EventInner<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn meta(&self) -> &DeclMeta {
        &self.meta
    }

    fn payload(&self, ctx: &mut ReadCtx<'_>, arg: &Value) -> Value {
        match &self.run {
            Some(run) => {
                let arg = arg
                    .downcast_ref::<A>()
                    .expect("event argument type is fixed by the declaration");
                Arc::new(run(ctx, arg))
            }
            // Verbatim events are declared with T = A; the payload passes
            // through untouched.
            None => Arc::clone(arg),
        }
    }
}
