//! The command-output effect tree.
//!
//! A command body returns a [`CommandOutput`]: zero, one, or a nested list
//! of effects. Dispatch flattens the tree depth-first, left-to-right, and
//! applies each leaf immediately in sequence, so a later leaf observes the
//! state committed by an earlier one. The closed enum makes malformed
//! effect shapes unrepresentable; the dispatcher matches exhaustively.
//!
//! Effects are built through instance methods rather than constructed
//! directly: [`crate::nodes::StateItem::set`],
//! [`crate::nodes::EventItem::emit`], [`crate::nodes::CommandItem::invoke`],
//! and [`crate::nodes::StreamItem::trigger`].

use std::fmt;
use std::sync::Arc;

use super::{ArgValue, ErasedCommand, ErasedEvent, ErasedState, ErasedStream};
use crate::types::Value;

/// The recursive result shape returned by a command body.
///
/// # Examples
///
/// ```rust
/// use loomstate::nodes::{CommandOutput, StateDef};
///
/// let a: StateDef<(), i32> = StateDef::new("a", |_| 0);
/// let b: StateDef<(), i32> = StateDef::new("b", |_| 0);
///
/// // An ordered batch: applied as a.set, then b.set.
/// let batch = CommandOutput::from(vec![a.item().set(1), b.item().set(2)]);
/// # let _ = batch;
/// ```
#[derive(Clone, Default)]
pub enum CommandOutput {
    /// No effect.
    #[default]
    None,
    /// Write a state instance.
    SetState(StateWrite),
    /// Publish an event.
    EmitEvent(EventEmit),
    /// Run a nested command at this position.
    Dispatch(CommandCall),
    /// Push a value into a command-stream's input.
    Trigger(StreamTrigger),
    /// An ordered list of any of the above, flattened depth-first.
    List(Vec<CommandOutput>),
}

impl CommandOutput {
    /// Collect effects into an ordered batch.
    pub fn list(outputs: impl IntoIterator<Item = CommandOutput>) -> Self {
        CommandOutput::List(outputs.into_iter().collect())
    }
}

impl From<Vec<CommandOutput>> for CommandOutput {
    fn from(outputs: Vec<CommandOutput>) -> Self {
        CommandOutput::List(outputs)
    }
}

impl From<Option<CommandOutput>> for CommandOutput {
    fn from(output: Option<CommandOutput>) -> Self {
        output.unwrap_or(CommandOutput::None)
    }
}

impl FromIterator<CommandOutput> for CommandOutput {
    fn from_iter<I: IntoIterator<Item = CommandOutput>>(iter: I) -> Self {
        CommandOutput::List(iter.into_iter().collect())
    }
}

impl fmt::Debug for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutput::None => write!(f, "None"),
            CommandOutput::SetState(w) => write!(f, "SetState({})", w.decl.meta().name),
            CommandOutput::EmitEvent(e) => write!(f, "EmitEvent({})", e.decl.meta().name),
            CommandOutput::Dispatch(c) => write!(f, "Dispatch({})", c.decl.meta().name),
            CommandOutput::Trigger(t) => write!(f, "Trigger({})", t.decl.meta().name),
            CommandOutput::List(items) => f.debug_list().entries(items).finish(),
        }
    }
}

/// A pending write of one state instance.
#[derive(Clone)]
pub struct StateWrite {
    pub(crate) decl: Arc<dyn ErasedState>,
    pub(crate) arg: ArgValue,
    pub(crate) value: Value,
}

/// A pending event publication.
#[derive(Clone)]
pub struct EventEmit {
    pub(crate) decl: Arc<dyn ErasedEvent>,
    pub(crate) arg: Value,
}

/// A pending nested command invocation.
#[derive(Clone)]
pub struct CommandCall {
    pub(crate) decl: Arc<dyn ErasedCommand>,
    pub(crate) arg: Value,
}

/// A pending command-stream input push.
#[derive(Clone)]
pub struct StreamTrigger {
    pub(crate) decl: Arc<dyn ErasedStream>,
    pub(crate) arg: Value,
}
