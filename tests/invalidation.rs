mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use common::Recorder;
use loomstate::{CommandDef, CommandOutput, QueryDef, StateDef, Store};

#[test]
fn dependent_query_recomputes_and_notifies_once() {
    let value: StateDef<(), i32> = StateDef::new("value", |_| 0);
    let doubled = QueryDef::new("doubled", {
        let value = value.clone();
        move |ctx, _: &()| ctx.get(&value.item()) * 2
    });
    let set = CommandDef::new("set", {
        let value = value.clone();
        move |_ctx, next: &i32| value.item().set(*next)
    });

    let store = Store::new();
    let seen: Recorder<i32> = Recorder::new();
    let _sub = store
        .subscribe_query(&doubled.item(), {
            let seen = seen.clone();
            move |value| seen.push(*value)
        })
        .unwrap();

    store.send_command(&set.with(5)).unwrap();
    assert_eq!(store.query(&doubled.item()).unwrap(), 10);
    assert_eq!(seen.snapshot(), vec![10]);
}

#[test]
fn three_writes_in_one_command_notify_once_with_final_value() {
    let value: StateDef<(), i32> = StateDef::new("value", |_| 0);
    let doubled = QueryDef::new("doubled", {
        let value = value.clone();
        move |ctx, _: &()| ctx.get(&value.item()) * 2
    });
    let sweep = CommandDef::new("sweep", {
        let value = value.clone();
        move |_ctx, _: &()| {
            CommandOutput::list([
                value.item().set(1),
                value.item().set(2),
                value.item().set(3),
            ])
        }
    });

    let store = Store::new();
    let seen: Recorder<i32> = Recorder::new();
    let _sub = store
        .subscribe_query(&doubled.item(), {
            let seen = seen.clone();
            move |value| seen.push(*value)
        })
        .unwrap();

    store.send_command(&sweep.item()).unwrap();
    assert_eq!(seen.snapshot(), vec![6]);
}

#[test]
fn equal_compare_suppresses_downstream_propagation() {
    // Only the id is significant; a structurally new payload with the same
    // id must not wake the graph.
    let selection: StateDef<(), (u64, String)> = StateDef::with_compare(
        "selection",
        |_| (1, "first".to_string()),
        |prev, next| prev.0 == next.0,
    );
    let label = QueryDef::new("label", {
        let selection = selection.clone();
        move |ctx, _: &()| ctx.get(&selection.item()).1
    });
    let select = CommandDef::new("select", {
        let selection = selection.clone();
        move |_ctx, next: &(u64, String)| selection.item().set(next.clone())
    });

    let store = Store::new();
    let seen: Recorder<String> = Recorder::new();
    let _sub = store
        .subscribe_query(&label.item(), {
            let seen = seen.clone();
            move |value| seen.push(value.clone())
        })
        .unwrap();

    store
        .send_command(&select.with((1, "renamed".to_string())))
        .unwrap();
    assert_eq!(seen.len(), 0);

    store
        .send_command(&select.with((2, "second".to_string())))
        .unwrap();
    assert_eq!(seen.snapshot(), vec!["second".to_string()]);
}

#[test]
fn unrelated_writes_do_not_rerun_the_query() {
    let runs = Arc::new(AtomicUsize::new(0));
    let watched: StateDef<(), i32> = StateDef::new("watched", |_| 0);
    let other: StateDef<(), i32> = StateDef::new("other", |_| 0);
    let total = QueryDef::new("total", {
        let runs = Arc::clone(&runs);
        let watched = watched.clone();
        move |ctx, _: &()| {
            runs.fetch_add(1, Ordering::SeqCst);
            ctx.get(&watched.item())
        }
    });
    let set_other = CommandDef::new("set_other", {
        let other = other.clone();
        move |_ctx, next: &i32| other.item().set(*next)
    });

    let store = Store::new();
    let seen: Recorder<i32> = Recorder::new();
    let _sub = store
        .subscribe_query(&total.item(), {
            let seen = seen.clone();
            move |value| seen.push(*value)
        })
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    store.send_command(&set_other.with(9)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(seen.len(), 0);
}

#[test]
fn dependency_edges_rebuild_on_every_recomputation() {
    let runs = Arc::new(AtomicUsize::new(0));
    let use_left: StateDef<(), bool> = StateDef::new("use_left", |_| true);
    let left: StateDef<(), i32> = StateDef::new("left", |_| 1);
    let right: StateDef<(), i32> = StateDef::new("right", |_| 100);
    let picked = QueryDef::new("picked", {
        let runs = Arc::clone(&runs);
        let use_left = use_left.clone();
        let left = left.clone();
        let right = right.clone();
        move |ctx, _: &()| {
            runs.fetch_add(1, Ordering::SeqCst);
            if ctx.get(&use_left.item()) {
                ctx.get(&left.item())
            } else {
                ctx.get(&right.item())
            }
        }
    });
    let set_left = CommandDef::new("set_left", {
        let left = left.clone();
        move |_ctx, next: &i32| left.item().set(*next)
    });
    let flip = CommandDef::new("flip", {
        let use_left = use_left.clone();
        move |_ctx, _: &()| use_left.item().set(false)
    });

    let store = Store::new();
    let seen: Recorder<i32> = Recorder::new();
    let _sub = store
        .subscribe_query(&picked.item(), {
            let seen = seen.clone();
            move |value| seen.push(*value)
        })
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    store.send_command(&set_left.with(2)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(seen.snapshot(), vec![2]);

    store.send_command(&flip.item()).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(seen.snapshot(), vec![2, 100]);

    // The left branch is no longer read; writing it must not recompute.
    store.send_command(&set_left.with(50)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(seen.snapshot(), vec![2, 100]);
}

#[test]
fn deep_chains_invalidate_without_stack_growth() {
    const DEPTH: u32 = 300;

    let base: StateDef<(), i64> = StateDef::new("base", |_| 0);
    let slot: Arc<OnceLock<QueryDef<u32, i64>>> = Arc::new(OnceLock::new());
    let chain = QueryDef::new("chain", {
        let slot = Arc::clone(&slot);
        let base = base.clone();
        move |ctx, depth: &u32| {
            if *depth == 0 {
                ctx.get(&base.item())
            } else {
                ctx.get(&slot.get().unwrap().with(depth - 1)) + 1
            }
        }
    });
    slot.set(chain.clone()).ok();
    let set_base = CommandDef::new("set_base", {
        let base = base.clone();
        move |_ctx, next: &i64| base.item().set(*next)
    });

    let store = Store::new();
    assert_eq!(store.query(&chain.with(DEPTH)).unwrap(), i64::from(DEPTH));

    store.send_command(&set_base.with(5)).unwrap();
    assert_eq!(
        store.query(&chain.with(DEPTH)).unwrap(),
        i64::from(DEPTH) + 5
    );
}
