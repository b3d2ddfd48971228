//! Command declarations.
//!
//! A [`CommandDef`] declares an impure-by-design composite operation. The
//! body reads through its context and returns a [`CommandOutput`] effect
//! tree; it never mutates storage directly. Commands have no storage of
//! their own; dispatching one is a pure function from the current graph
//! state to an ordered effect list.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use super::output::{CommandCall, CommandOutput};
use super::{DeclMeta, DispatchPayload, DispatchRef, DispatchTarget, ErasedCommand};
use crate::store::ctx::ReadCtx;
use crate::types::{NodeKind, Value};

/// Declaration of a command.
///
/// # Examples
///
/// ```rust
/// use loomstate::nodes::{CommandDef, StateDef};
///
/// let count: StateDef<(), i32> = StateDef::new("count", |_| 0);
/// let add = CommandDef::new("add", {
///     let count = count.clone();
///     move |ctx, amount: &i32| {
///         let current = ctx.get(&count.item());
///         count.item().set(current + amount)
///     }
/// });
/// # let _ = add;
/// ```
pub struct CommandDef<A> {
    pub(crate) inner: Arc<CommandInner<A>>,
}

pub(crate) struct CommandInner<A> {
    pub(crate) meta: DeclMeta,
    pub(crate) run: Box<dyn Fn(&mut ReadCtx<'_>, &A) -> CommandOutput + Send + Sync>,
    pub(crate) nullary: OnceLock<Value>,
}

impl<A> Clone for CommandDef<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for CommandDef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandDef({})", self.inner.meta.name)
    }
}

impl<A> CommandDef<A>
where
    A: Send + Sync + 'static,
{
    /// Declare a command.
    pub fn new(
        name: impl Into<String>,
        run: impl Fn(&mut ReadCtx<'_>, &A) -> CommandOutput + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(CommandInner {
                meta: DeclMeta::new(NodeKind::Command, name),
                run: Box::new(run),
                nullary: OnceLock::new(),
            }),
        }
    }

    /// The declared name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.inner.meta.name
    }

    /// Build the dispatch payload for one concrete argument.
    pub fn with(&self, arg: A) -> CommandItem<A> {
        CommandItem {
            inner: Arc::clone(&self.inner),
            arg: Arc::new(arg),
        }
    }

    /// Build the nested-invocation effect directly; sugar for
    /// `def.with(arg).invoke()`.
    pub fn invoke(&self, arg: A) -> CommandOutput {
        self.with(arg).invoke()
    }
}

impl CommandDef<()> {
    /// The argument-less payload, memoized on the declaration.
    pub fn item(&self) -> CommandItem<()> {
        let arg = self.inner.nullary.get_or_init(|| Arc::new(())).clone();
        CommandItem {
            inner: Arc::clone(&self.inner),
            arg,
        }
    }
}

/// One command invocation payload: a declaration paired with an argument.
pub struct CommandItem<A> {
    pub(crate) inner: Arc<CommandInner<A>>,
    pub(crate) arg: Value,
}

impl<A> Clone for CommandItem<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            arg: Arc::clone(&self.arg),
        }
    }
}

impl<A> fmt::Debug for CommandItem<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandItem({})", self.inner.meta.name)
    }
}

impl<A> CommandItem<A>
where
    A: Send + Sync + 'static,
{
    /// Build the nested-invocation effect for this payload.
    pub fn invoke(&self) -> CommandOutput {
        let decl: Arc<dyn ErasedCommand> = Arc::clone(&self.inner) as _;
        CommandOutput::Dispatch(CommandCall {
            decl,
            arg: Arc::clone(&self.arg),
        })
    }

    /// `true` when both handles are the same instance token.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) && Arc::ptr_eq(&self.arg, &other.arg)
    }
}

impl<A> DispatchPayload for CommandItem<A>
where
    A: Send + Sync + 'static,
{
    fn dispatch_ref(&self) -> DispatchRef {
        let decl: Arc<dyn ErasedCommand> = Arc::clone(&self.inner) as _;
        DispatchRef(DispatchTarget::Command {
            decl,
            arg: Arc::clone(&self.arg),
        })
    }
}

impl<A> ErasedCommand for CommandInner<A>
where
    A: Send + Sync + 'static,
{
    fn meta(&self) -> &DeclMeta {
        &self.meta
    }

    fn run(&self, ctx: &mut ReadCtx<'_>, arg: &dyn Any) -> CommandOutput {
        let arg = arg
            .downcast_ref::<A>()
            .expect("command argument type is fixed by the declaration");
        (self.run)(ctx, arg)
    }
}
