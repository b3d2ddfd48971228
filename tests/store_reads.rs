mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::counter;
use loomstate::{QueryDef, StateDef, Store, StoreError};

#[test]
fn state_reads_lazily_initialize() {
    let name: StateDef<(), String> = StateDef::new("name", |_| "anon".to_string());
    let store = Store::new();
    assert_eq!(store.query(&name.item()).unwrap(), "anon");
}

#[test]
fn keyed_instances_resolve_by_structural_equality() {
    let rows: StateDef<u32, String> = StateDef::new("rows", |id| format!("row-{id}"));
    let store = Store::new();

    assert_eq!(store.query(&rows.with(7)).unwrap(), "row-7");
    assert_eq!(store.query(&rows.with(3)).unwrap(), "row-3");

    // Two instances built from equal arguments share one key.
    assert_eq!(
        store.get_key(&rows.with(7)).unwrap(),
        store.get_key(&rows.with(7)).unwrap(),
    );
}

#[test]
fn get_key_formats_kind_name_and_argument() {
    let rows: StateDef<u32, String> = StateDef::new("rows", |id| format!("row-{id}"));
    let total: QueryDef<(), i32> = QueryDef::new("total", |_, _| 0);
    let store = Store::new();

    assert_eq!(store.get_key(&rows.with(7)).unwrap(), "State:rows:7");
    assert_eq!(store.get_key(&total.item()).unwrap(), "Query:total:null");
}

#[test]
fn nullary_instances_are_referentially_stable() {
    let (count, _) = counter();
    assert!(count.item().ptr_eq(&count.item()));
}

#[test]
fn query_value_is_cached_between_reads() {
    let runs = Arc::new(AtomicUsize::new(0));
    let base: StateDef<(), i32> = StateDef::new("base", |_| 4);
    let total = QueryDef::new("total", {
        let runs = Arc::clone(&runs);
        let base = base.clone();
        move |ctx, _: &()| {
            runs.fetch_add(1, Ordering::SeqCst);
            ctx.get(&base.item()) * 10
        }
    });

    let store = Store::new();
    assert_eq!(store.query(&total.item()).unwrap(), 40);
    assert_eq!(store.query(&total.item()).unwrap(), 40);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn destroyed_store_rejects_operations() {
    let (count, incre) = counter();
    let store = Store::new();
    store.send_command(&incre.item()).unwrap();
    store.destroy();

    assert!(matches!(
        store.query(&count.item()),
        Err(StoreError::Destroyed { .. })
    ));
    assert!(matches!(
        store.send_command(&incre.item()),
        Err(StoreError::Destroyed { .. })
    ));
    // Destroying twice is a no-op.
    store.destroy();
}

#[test]
fn stores_are_independent() {
    let (count, incre) = counter();
    let first = Store::new();
    let second = Store::new();

    first.send_command(&incre.item()).unwrap();
    assert_eq!(first.query(&count.item()).unwrap(), 1);
    assert_eq!(second.query(&count.item()).unwrap(), 0);
}
