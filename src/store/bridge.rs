//! Bridges long-lived asynchronous pipelines into the synchronous core.
//!
//! Each command-stream storage owns a flume input channel and a tokio task
//! draining the pipeline's output. Every produced effect re-enters the store
//! exactly like a fresh external call, serializing behind any in-flight
//! cascade; the task holds only a weak store reference so a dropped store
//! ends forwarding. Start is idempotent per storage.
//!
//! Pipelines require an ambient tokio runtime at start time.

use std::sync::{Arc, Weak};

use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use super::arena::{StoreCore, StreamStorage};
use super::ctx::StreamCtx;
use super::{Store, StoreInner};
use crate::errors::StoreError;
use crate::nodes::{CommandOutput, ErasedStream};
use crate::types::{NodeId, Value};

fn decl_key(decl: &Arc<dyn ErasedStream>) -> usize {
    Arc::as_ptr(decl) as *const () as usize
}

/// Resolve (creating lazily) the storage behind a pipeline declaration and
/// start it if it has not been started yet.
pub(crate) fn ensure_started(
    core: &mut StoreCore,
    decl: &Arc<dyn ErasedStream>,
) -> Result<NodeId, StoreError> {
    let meta = decl.meta();
    let node = core.resolve_decl(decl_key(decl), || Box::new(Arc::clone(decl)), meta)?;
    if !core.streams.contains_key(&node) {
        let owner = core.owner_domain(meta);
        core.streams.insert(
            node,
            StreamStorage {
                decl: Arc::clone(decl),
                owner,
                started: false,
                sender: None,
                task: None,
                subs: Vec::new(),
            },
        );
        if let Some(domain) = core.domains.get_mut(&owner) {
            domain.owned_streams.insert(node);
        }
    }

    let already = core
        .streams
        .get(&node)
        .is_some_and(|storage| storage.started);
    if already {
        return Ok(node);
    }
    if let Some(storage) = core.streams.get_mut(&node) {
        storage.started = true;
    }

    tracing::debug!(stream = %meta.name, "starting command pipeline");
    let (opened, subs) = {
        let mut ctx = StreamCtx {
            core: &mut *core,
            subs: Vec::new(),
        };
        let opened = decl.open(&mut ctx);
        (opened, ctx.subs)
    };
    let weak = core.weak_self.clone();
    let task = tokio::spawn(forward_outputs(weak, opened.output, meta.name.clone()));
    if let Some(storage) = core.streams.get_mut(&node) {
        storage.sender = Some(opened.sender);
        storage.task = Some(task);
        storage.subs = subs;
    }
    Ok(node)
}

/// Push one value into a pipeline's input, starting it lazily first.
pub(crate) fn trigger(
    core: &mut StoreCore,
    decl: &Arc<dyn ErasedStream>,
    arg: &Value,
) -> Result<(), StoreError> {
    let node = ensure_started(core, decl)?;
    if let Some(sender) = core.streams.get(&node).and_then(|s| s.sender.as_ref()) {
        decl.push(sender.as_ref(), arg.as_ref());
    }
    Ok(())
}

async fn forward_outputs(
    weak: Weak<StoreInner>,
    mut output: BoxStream<'static, CommandOutput>,
    stream_name: String,
) {
    while let Some(command) = output.next().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let store = Store::from_inner(inner);
        if store.dispatch_output(command).is_err() {
            tracing::debug!(stream = %stream_name, "store destroyed; pipeline forwarding stopped");
            break;
        }
    }
}
