//! The command dispatcher.
//!
//! A [`CommandOutput`] tree is flattened depth-first, left-to-right, and
//! each leaf effect applies immediately; a later leaf observes the state
//! committed by an earlier one. State writes drive the invalidation cascade
//! before the next leaf runs; subscriber notification stays coalesced until
//! the whole dispatch settles.

use std::sync::Arc;

use super::arena::{OutboxItem, StoreCore};
use super::bridge;
use super::ctx::{ReadCtx, state_storage};
use super::invalidate::invalidate_from;
use crate::errors::StoreError;
use crate::nodes::{ArgValue, CommandOutput, ErasedCommand, ErasedEvent, ErasedState};
use crate::types::{StorageKey, Value};

/// Apply one effect tree in declared order.
pub(crate) fn apply_output(core: &mut StoreCore, output: CommandOutput) -> Result<(), StoreError> {
    match output {
        CommandOutput::None => Ok(()),
        CommandOutput::List(outputs) => {
            for output in outputs {
                apply_output(core, output)?;
            }
            Ok(())
        }
        CommandOutput::SetState(write) => apply_write(core, &write.decl, &write.arg, write.value),
        CommandOutput::EmitEvent(emit) => apply_emit(core, &emit.decl, &emit.arg),
        CommandOutput::Dispatch(call) => {
            let output = run_command(core, &call.decl, &call.arg);
            apply_output(core, output)
        }
        CommandOutput::Trigger(trigger) => bridge::trigger(core, &trigger.decl, &trigger.arg),
    }
}

/// Run a command body against an untracked read context.
pub(crate) fn run_command(
    core: &mut StoreCore,
    decl: &Arc<dyn ErasedCommand>,
    arg: &Value,
) -> CommandOutput {
    tracing::trace!(command = %decl.meta().name, "dispatching command");
    let mut ctx = ReadCtx::untracked(core);
    decl.run(&mut ctx, arg.as_ref())
}

/// Write one state instance: compare first, and on change invalidate the
/// full downstream set before returning.
pub(crate) fn apply_write(
    core: &mut StoreCore,
    decl: &Arc<dyn ErasedState>,
    arg: &ArgValue,
    value: Value,
) -> Result<(), StoreError> {
    let key = state_storage(core, decl, arg)?;
    let seeds: Vec<StorageKey> = {
        let storage = core.states.get_mut(&key).expect("storage just resolved");
        if decl.compare(storage.value.as_ref(), value.as_ref()) {
            // No-op write: no invalidation, no notification.
            return Ok(());
        }
        storage.value = value;
        storage.downstream.iter().cloned().collect()
    };
    tracing::debug!(state = %decl.meta().name, fanout = seeds.len(), "state written");
    invalidate_from(core, seeds);
    Ok(())
}

/// Publish an event: compute the delivered payload at the emission point and
/// queue one notification per subscriber.
pub(crate) fn apply_emit(
    core: &mut StoreCore,
    decl: &Arc<dyn ErasedEvent>,
    arg: &Value,
) -> Result<(), StoreError> {
    let node = super::ctx::event_storage(core, decl)?;
    let payload = {
        let mut ctx = ReadCtx::untracked(core);
        decl.payload(&mut ctx, arg)
    };
    if let Some(storage) = core.events.get(&node) {
        for (_, subscriber) in &storage.subscribers {
            core.outbox.push(OutboxItem::Notify {
                subscriber: Arc::clone(subscriber),
                value: Arc::clone(&payload),
            });
        }
    }
    Ok(())
}
