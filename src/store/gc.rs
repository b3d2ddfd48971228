//! Reference-counted storage reclamation.
//!
//! Candidate-driven: only storages scheduled after losing a reference are
//! examined, so a storage that never lost one is retained indefinitely. The
//! collector loops to a fixed point; tearing down a query releases its
//! upstream storages, which may become eligible in the same pass, so one
//! external unsubscribe can free an entire unreachable subgraph.
//!
//! Eligibility: zero external subscribers and an empty downstream set; a
//! domain additionally requires no active subscription and no dependent
//! domain. The default domain is never collected.

use super::arena::{GcTarget, StoreCore, SubTarget};
use super::invalidate::detach_edge;
use crate::types::{NodeId, StorageKey};

pub(crate) fn run(core: &mut StoreCore) {
    let mut reaped = 0usize;
    while let Some(target) = core.gc_queue.pop() {
        match target {
            GcTarget::State(key) => {
                let eligible = core
                    .states
                    .get(&key)
                    .is_some_and(|storage| storage.downstream.is_empty());
                if eligible {
                    teardown_state(core, &key);
                    reaped += 1;
                }
            }
            GcTarget::Query(key) => {
                let eligible = core.queries.get(&key).is_some_and(|storage| {
                    storage.downstream.is_empty() && storage.subscribers.is_empty()
                });
                if eligible {
                    teardown_query(core, &key);
                    reaped += 1;
                }
            }
            GcTarget::Event(node) => {
                let eligible = core
                    .events
                    .get(&node)
                    .is_some_and(|storage| storage.subscribers.is_empty());
                if eligible {
                    teardown_event(core, node);
                    reaped += 1;
                }
            }
            GcTarget::Domain(node) => {
                if node == NodeId::DEFAULT_DOMAIN {
                    continue;
                }
                let eligible = core
                    .domains
                    .get(&node)
                    .is_some_and(|storage| storage.refs == 0 && storage.downstream.is_empty());
                if eligible {
                    teardown_domain(core, node);
                    reaped += 1;
                }
            }
        }
    }
    if reaped > 0 {
        tracing::debug!(reaped, "collector reclaimed storages");
    }
}

fn teardown_state(core: &mut StoreCore, key: &StorageKey) {
    let Some(storage) = core.states.remove(key) else {
        return;
    };
    tracing::trace!(state = %storage.decl.meta().name, key = %key, "state storage destroyed");
    if let Some(domain) = core.domains.get_mut(&storage.owner) {
        domain.owned_states.remove(key);
    }
}

fn teardown_query(core: &mut StoreCore, key: &StorageKey) {
    let Some(storage) = core.queries.remove(key) else {
        return;
    };
    tracing::trace!(query = %storage.decl.meta().name, key = %key, "query storage destroyed");
    if let Some(domain) = core.domains.get_mut(&storage.owner) {
        domain.owned_queries.remove(key);
    }
    for source in &storage.upstream {
        detach_edge(core, source, key);
    }
}

fn teardown_event(core: &mut StoreCore, node: NodeId) {
    let Some(storage) = core.events.remove(&node) else {
        return;
    };
    tracing::trace!(event = %storage.decl.meta().name, "event storage destroyed");
    if let Some(domain) = core.domains.get_mut(&storage.owner) {
        domain.owned_events.remove(&node);
    }
}

pub(crate) fn teardown_stream(core: &mut StoreCore, node: NodeId) {
    let Some(mut storage) = core.streams.remove(&node) else {
        return;
    };
    tracing::debug!(stream = %storage.decl.meta().name, "stopping command pipeline");
    if let Some(task) = storage.task.take() {
        task.abort();
    }
    storage.sender = None;
    for sub in std::mem::take(&mut storage.subs) {
        release_internal_sub(core, &sub.target, sub.id);
    }
    if let Some(domain) = core.domains.get_mut(&storage.owner) {
        domain.owned_streams.remove(&node);
    }
}

/// Destroy a domain: every owned storage first, then release the upstream
/// domains it depended on.
fn teardown_domain(core: &mut StoreCore, node: NodeId) {
    let Some(storage) = core.domains.remove(&node) else {
        return;
    };
    tracing::debug!(domain = %storage.name, "domain storage destroyed");
    for stream in storage.owned_streams {
        teardown_stream(core, stream);
    }
    for key in storage.owned_queries {
        if let Some(query) = core.queries.remove(&key) {
            for source in &query.upstream {
                detach_edge(core, source, &key);
            }
        }
    }
    for key in storage.owned_states {
        core.states.remove(&key);
    }
    for event in storage.owned_events {
        core.events.remove(&event);
    }
    for upstream in storage.upstream {
        if let Some(up) = core.domains.get_mut(&upstream) {
            up.downstream.remove(&node);
        }
        core.schedule(GcTarget::Domain(upstream));
    }
}

/// Release a pipeline-held adapter subscription. Unlike external handles,
/// these never retained the owning domain, only the storage itself.
fn release_internal_sub(core: &mut StoreCore, target: &SubTarget, id: u64) {
    match target {
        SubTarget::Query(key) => {
            if let Some(storage) = core.queries.get_mut(key) {
                storage.subscribers.retain(|(sid, _)| *sid != id);
            }
            core.schedule(GcTarget::Query(key.clone()));
        }
        SubTarget::Event(node) => {
            if let Some(storage) = core.events.get_mut(node) {
                storage.subscribers.retain(|(sid, _)| *sid != id);
            }
            core.schedule(GcTarget::Event(*node));
        }
        SubTarget::Domain(_) => {}
    }
}

/// Drop one subscriber and schedule the affected storages for collection.
pub(crate) fn release_subscriber(core: &mut StoreCore, target: &SubTarget, id: u64) {
    match target {
        SubTarget::Query(key) => {
            let released = match core.queries.get_mut(key) {
                Some(storage) => {
                    let before = storage.subscribers.len();
                    storage.subscribers.retain(|(sid, _)| *sid != id);
                    (before != storage.subscribers.len()).then_some(storage.owner)
                }
                None => None,
            };
            if let Some(owner) = released {
                core.schedule(GcTarget::Query(key.clone()));
                release_domain_ref(core, owner);
            }
        }
        SubTarget::Event(node) => {
            let released = match core.events.get_mut(node) {
                Some(storage) => {
                    let before = storage.subscribers.len();
                    storage.subscribers.retain(|(sid, _)| *sid != id);
                    (before != storage.subscribers.len()).then_some(storage.owner)
                }
                None => None,
            };
            if let Some(owner) = released {
                core.schedule(GcTarget::Event(*node));
                release_domain_ref(core, owner);
            }
        }
        SubTarget::Domain(node) => release_domain_ref(core, *node),
    }
}

fn release_domain_ref(core: &mut StoreCore, node: NodeId) {
    if let Some(domain) = core.domains.get_mut(&node) {
        domain.refs = domain.refs.saturating_sub(1);
    }
    core.schedule(GcTarget::Domain(node));
}
