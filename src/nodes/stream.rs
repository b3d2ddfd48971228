//! Command-stream declarations.
//!
//! A [`StreamDef`] declares a long-lived asynchronous pipeline bridged to
//! the synchronous dispatcher. The body receives a typed input stream (fed
//! by trigger effects) plus a context exposing `from_event` / `from_query`
//! adapters, and returns a stream of [`CommandOutput`]s; the store forwards
//! every produced output into dispatch as a fresh external call. A pipeline
//! is started at most once per storage: lazily on first trigger, or when
//! its owning domain is first subscribed.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use super::output::{CommandOutput, StreamTrigger};
use super::{DeclMeta, DispatchPayload, DispatchRef, DispatchTarget, ErasedStream, OpenedStream};
use crate::store::ctx::StreamCtx;
use crate::types::{NodeKind, Value};

/// Declaration of an asynchronous command pipeline.
///
/// # Examples
///
/// ```rust
/// use futures_util::StreamExt;
/// use futures_util::stream::BoxStream;
/// use loomstate::nodes::{StateDef, StreamDef};
///
/// let count: StateDef<(), i32> = StateDef::new("count", |_| 0);
/// let apply = StreamDef::new("apply", {
///     let count = count.clone();
///     move |_ctx, input: BoxStream<'static, i32>| {
///         let count = count.clone();
///         input.map(move |delta| count.item().set(delta)).boxed()
///     }
/// });
/// # let _ = apply;
/// ```
pub struct StreamDef<A> {
    pub(crate) inner: Arc<StreamInner<A>>,
}

type StreamBody<A> = dyn Fn(&mut StreamCtx<'_>, BoxStream<'static, A>) -> BoxStream<'static, CommandOutput>
    + Send
    + Sync;

pub(crate) struct StreamInner<A> {
    pub(crate) meta: DeclMeta,
    pub(crate) run: Box<StreamBody<A>>,
    pub(crate) nullary: OnceLock<Value>,
}

impl<A> Clone for StreamDef<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for StreamDef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamDef({})", self.inner.meta.name)
    }
}

impl<A> StreamDef<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Declare a command pipeline.
    pub fn new(
        name: impl Into<String>,
        run: impl Fn(&mut StreamCtx<'_>, BoxStream<'static, A>) -> BoxStream<'static, CommandOutput>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                meta: DeclMeta::new(NodeKind::CommandStream, name),
                run: Box::new(run),
                nullary: OnceLock::new(),
            }),
        }
    }

    /// The declared name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.inner.meta.name
    }

    /// Build the trigger payload for one concrete input value.
    pub fn with(&self, arg: A) -> StreamItem<A> {
        StreamItem {
            inner: Arc::clone(&self.inner),
            arg: Arc::new(arg),
        }
    }

    /// Build the trigger effect directly; sugar for
    /// `def.with(arg).trigger()`.
    pub fn trigger(&self, arg: A) -> CommandOutput {
        self.with(arg).trigger()
    }
}

impl StreamDef<()> {
    /// The argument-less trigger payload, memoized on the declaration.
    pub fn item(&self) -> StreamItem<()> {
        let arg = self.inner.nullary.get_or_init(|| Arc::new(())).clone();
        StreamItem {
            inner: Arc::clone(&self.inner),
            arg,
        }
    }
}

/// One trigger payload: a declaration paired with the input value pushed
/// into the pipeline.
pub struct StreamItem<A> {
    pub(crate) inner: Arc<StreamInner<A>>,
    pub(crate) arg: Value,
}

impl<A> Clone for StreamItem<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            arg: Arc::clone(&self.arg),
        }
    }
}

impl<A> fmt::Debug for StreamItem<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamItem({})", self.inner.meta.name)
    }
}

impl<A> StreamItem<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Build the trigger effect for this payload.
    pub fn trigger(&self) -> CommandOutput {
        let decl: Arc<dyn ErasedStream> = Arc::clone(&self.inner) as _;
        CommandOutput::Trigger(StreamTrigger {
            decl,
            arg: Arc::clone(&self.arg),
        })
    }

    /// `true` when both handles are the same instance token.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) && Arc::ptr_eq(&self.arg, &other.arg)
    }
}

impl<A> DispatchPayload for StreamItem<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn dispatch_ref(&self) -> DispatchRef {
        let decl: Arc<dyn ErasedStream> = Arc::clone(&self.inner) as _;
        DispatchRef(DispatchTarget::Stream {
            decl,
            arg: Arc::clone(&self.arg),
        })
    }
}

impl<A> ErasedStream for StreamInner<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn meta(&self) -> &DeclMeta {
        &self.meta
    }

    fn open(&self, ctx: &mut StreamCtx<'_>) -> OpenedStream {
        let (tx, rx) = flume::unbounded::<A>();
        let input = rx.into_stream().boxed();
        let output = (self.run)(ctx, input);
        OpenedStream {
            sender: Box::new(tx),
            output,
        }
    }

    fn push(&self, sender: &dyn Any, arg: &dyn Any) {
        let (Some(tx), Some(arg)) = (
            sender.downcast_ref::<flume::Sender<A>>(),
            arg.downcast_ref::<A>(),
        ) else {
            return;
        };
        // The receiver only disappears when the pipeline task has been torn
        // down; a failed push is then moot.
        let _ = tx.send(arg.clone());
    }
}
