mod common;

use common::{Recorder, counter};
use loomstate::{CommandDef, QueryDef, StateDef, Store};

fn value_pair() -> (StateDef<(), i32>, QueryDef<(), i32>, CommandDef<i32>) {
    let value: StateDef<(), i32> = StateDef::new("value", |_| 0);
    let doubled = QueryDef::new("doubled", {
        let value = value.clone();
        move |ctx, _: &()| ctx.get(&value.item()) * 2
    });
    let set = CommandDef::new("set", {
        let value = value.clone();
        move |_ctx, next: &i32| value.item().set(*next)
    });
    (value, doubled, set)
}

#[test]
fn unsubscribing_tears_down_the_unobserved_subgraph() {
    let (value, doubled, set) = value_pair();
    let store = Store::new();

    let sub = store
        .subscribe_query(&doubled.item(), |_: &i32| {})
        .unwrap();
    store.send_command(&set.with(5)).unwrap();
    assert_eq!(store.query(&doubled.item()).unwrap(), 10);

    // Dropping the only subscriber frees the query, which releases its
    // upstream state in the same collection pass.
    sub.unsubscribe();

    // A fresh read rebuilds the state storage from its initializer.
    assert_eq!(store.query(&value.item()).unwrap(), 0);
    assert_eq!(store.query(&doubled.item()).unwrap(), 0);
}

#[test]
fn unobserved_state_written_by_commands_is_retained() {
    // The collector is candidate-driven: a storage that never lost a
    // reference is never examined, so plain command state persists.
    let (count, incre) = counter();
    let store = Store::new();
    store.send_command(&incre.item()).unwrap();
    store.send_command(&incre.item()).unwrap();
    assert_eq!(store.query(&count.item()).unwrap(), 2);
}

#[test]
fn shared_upstream_survives_while_any_dependent_remains() {
    let value: StateDef<(), i32> = StateDef::new("value", |_| 0);
    let doubled = QueryDef::new("doubled", {
        let value = value.clone();
        move |ctx, _: &()| ctx.get(&value.item()) * 2
    });
    let tripled = QueryDef::new("tripled", {
        let value = value.clone();
        move |ctx, _: &()| ctx.get(&value.item()) * 3
    });
    let set = CommandDef::new("set", {
        let value = value.clone();
        move |_ctx, next: &i32| value.item().set(*next)
    });

    let store = Store::new();
    let first = store
        .subscribe_query(&doubled.item(), |_: &i32| {})
        .unwrap();
    let seen: Recorder<i32> = Recorder::new();
    let second = store
        .subscribe_query(&tripled.item(), {
            let seen = seen.clone();
            move |value| seen.push(*value)
        })
        .unwrap();

    store.send_command(&set.with(2)).unwrap();
    first.unsubscribe();

    // The state is still observed through the surviving query.
    store.send_command(&set.with(4)).unwrap();
    assert_eq!(seen.snapshot(), vec![6, 12]);

    second.unsubscribe();
    assert_eq!(store.query(&value.item()).unwrap(), 0);
}

#[test]
fn resubscribing_after_teardown_starts_from_scratch() {
    let (_, doubled, set) = value_pair();
    let store = Store::new();

    let seen: Recorder<i32> = Recorder::new();
    let sub = store
        .subscribe_query(&doubled.item(), {
            let seen = seen.clone();
            move |value| seen.push(*value)
        })
        .unwrap();
    store.send_command(&set.with(1)).unwrap();
    sub.unsubscribe();

    let _sub = store
        .subscribe_query(&doubled.item(), {
            let seen = seen.clone();
            move |value| seen.push(*value)
        })
        .unwrap();
    store.send_command(&set.with(3)).unwrap();
    assert_eq!(seen.snapshot(), vec![2, 6]);
}

#[test]
fn dropping_the_handle_releases_the_subscription() {
    let (value, doubled, set) = value_pair();
    let store = Store::new();
    {
        let _sub = store
            .subscribe_query(&doubled.item(), |_: &i32| {})
            .unwrap();
        store.send_command(&set.with(5)).unwrap();
    }
    // RAII release behaves like an explicit unsubscribe.
    assert_eq!(store.query(&value.item()).unwrap(), 0);
}
