//! Invalidation propagation and the commit phase.
//!
//! Propagation is an iterative worklist rather than recursive descent, so
//! arbitrarily deep dependency chains cannot overflow the call stack. For
//! each invalidated query: detach its old upstream edges, recompute against
//! a fresh tracking context (dependencies are dynamic), compare old and new
//! values, and only on change mark it dirty and fan out to its downstream
//! set. Equality stops propagation at that node, which keeps recomputation
//! proportional to the actually-changed subgraph.
//!
//! Storages that lost their last downstream edge during the rebuild are
//! scheduled for garbage-collection consideration. Dirty storages notify
//! their subscribers exactly once per settled cascade, with the final value,
//! no matter how many times they recomputed along the way.

use std::collections::VecDeque;
use std::sync::Arc;

use super::arena::{GcTarget, OutboxItem, StoreCore};
use super::ctx::evaluate;
use super::gc;
use crate::types::{SourceRef, StorageKey};

/// Propagate a value change through the downstream sets of the given seeds.
pub(crate) fn invalidate_from(core: &mut StoreCore, seeds: impl IntoIterator<Item = StorageKey>) {
    let mut worklist: VecDeque<StorageKey> = seeds.into_iter().collect();
    while let Some(key) = worklist.pop_front() {
        let Some((decl, arg, old_upstream, old_value)) =
            core.queries.get_mut(&key).map(|storage| {
                (
                    Arc::clone(&storage.decl),
                    Arc::clone(&storage.arg),
                    std::mem::take(&mut storage.upstream),
                    Arc::clone(&storage.value),
                )
            })
        else {
            continue;
        };

        for source in &old_upstream {
            detach_edge(core, source, &key);
        }

        let (next, reads) = evaluate(core, &decl, &arg, &key);
        let changed = !decl.compare(old_value.as_ref(), next.as_ref());

        let mut fanout: Vec<StorageKey> = Vec::new();
        if let Some(storage) = core.queries.get_mut(&key) {
            storage.upstream = reads.into_iter().collect();
            if changed {
                storage.value = next;
                fanout.extend(storage.downstream.iter().cloned());
            }
        }
        if changed {
            tracing::trace!(query = %decl.meta().name, key = %key, fanout = fanout.len(), "query value changed");
            core.mark_dirty(key);
            worklist.extend(fanout);
        }
    }
}

/// Remove `consumer` from `source`'s downstream set, scheduling `source` for
/// collection when that was its last dependent.
pub(crate) fn detach_edge(core: &mut StoreCore, source: &SourceRef, consumer: &StorageKey) {
    match source {
        SourceRef::State(key) => {
            let freed = match core.states.get_mut(key) {
                Some(storage) => {
                    storage.downstream.remove(consumer);
                    storage.downstream.is_empty()
                }
                None => false,
            };
            if freed {
                core.schedule(GcTarget::State(key.clone()));
            }
        }
        SourceRef::Query(key) => {
            let freed = match core.queries.get_mut(key) {
                Some(storage) => {
                    storage.downstream.remove(consumer);
                    storage.downstream.is_empty()
                }
                None => false,
            };
            if freed {
                core.schedule(GcTarget::Query(key.clone()));
            }
        }
    }
}

/// Commit phase: run the collector to a fixed point, then queue exactly one
/// notification per dirty storage with its final value.
pub(crate) fn commit(core: &mut StoreCore) {
    gc::run(core);
    let dirty = std::mem::take(&mut core.dirty);
    core.dirty_set.clear();
    for key in dirty {
        if let Some(storage) = core.queries.get(&key) {
            for (_, subscriber) in &storage.subscribers {
                core.outbox.push(OutboxItem::Notify {
                    subscriber: Arc::clone(subscriber),
                    value: Arc::clone(&storage.value),
                });
            }
        }
    }
}
