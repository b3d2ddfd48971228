mod common;

use std::panic::{AssertUnwindSafe, catch_unwind};

use common::counter;
use loomstate::{CommandDef, CommandOutput, StateDef, Store};

#[test]
fn counter_increments_twice() {
    let (count, incre) = counter();
    let store = Store::new();
    store.send_command(&incre.item()).unwrap();
    store.send_command(&incre.item()).unwrap();
    assert_eq!(store.query(&count.item()).unwrap(), 2);
}

#[test]
fn nested_lists_flatten_depth_first_in_order() {
    let log: StateDef<(), Vec<u8>> = StateDef::new("log", |_| Vec::new());
    let append = CommandDef::new("append", {
        let log = log.clone();
        move |ctx, value: &u8| {
            let mut entries = ctx.get(&log.item());
            entries.push(*value);
            log.item().set(entries)
        }
    });
    let batch = CommandDef::new("batch", {
        let append = append.clone();
        move |_ctx, _: &()| {
            CommandOutput::list([
                append.invoke(1),
                CommandOutput::list([append.invoke(2), append.invoke(3)]),
                append.invoke(4),
            ])
        }
    });

    let store = Store::new();
    store.send_command(&batch.item()).unwrap();
    assert_eq!(store.query(&log.item()).unwrap(), vec![1, 2, 3, 4]);
}

#[test]
fn later_leaves_observe_earlier_writes() {
    let value: StateDef<(), i32> = StateDef::new("value", |_| 0);
    let doubled: StateDef<(), i32> = StateDef::new("doubled", |_| 0);

    let mirror = CommandDef::new("mirror", {
        let value = value.clone();
        let doubled = doubled.clone();
        move |ctx, _: &()| {
            let current = ctx.get(&value.item());
            doubled.item().set(current * 2)
        }
    });
    let run = CommandDef::new("run", {
        let value = value.clone();
        let mirror = mirror.clone();
        move |_ctx, _: &()| CommandOutput::list([value.item().set(5), mirror.item().invoke()])
    });

    let store = Store::new();
    store.send_command(&run.item()).unwrap();
    assert_eq!(store.query(&doubled.item()).unwrap(), 10);
}

#[test]
fn empty_output_is_a_noop() {
    let noop: CommandDef<()> = CommandDef::new("noop", |_, _| CommandOutput::None);
    let store = Store::new();
    store.send_command(&noop.item()).unwrap();
}

#[test]
fn panicking_body_keeps_earlier_effects_committed() {
    let value: StateDef<(), i32> = StateDef::new("value", |_| 0);
    let explode: CommandDef<()> = CommandDef::new("explode", |_, _: &()| panic!("boom"));
    let run = CommandDef::new("run", {
        let value = value.clone();
        let explode = explode.clone();
        move |_ctx, _: &()| CommandOutput::list([value.item().set(1), explode.item().invoke()])
    });

    let store = Store::new();
    let outcome = catch_unwind(AssertUnwindSafe(|| store.send_command(&run.item())));
    assert!(outcome.is_err());

    // No rollback: the write before the panicking leaf stays committed, and
    // the store remains usable.
    assert_eq!(store.query(&value.item()).unwrap(), 1);
}

#[test]
fn commands_with_arguments_pass_them_through() {
    let value: StateDef<(), i32> = StateDef::new("value", |_| 0);
    let add = CommandDef::new("add", {
        let value = value.clone();
        move |ctx, amount: &i32| {
            let current = ctx.get(&value.item());
            value.item().set(current + amount)
        }
    });

    let store = Store::new();
    store.send_command(&add.with(3)).unwrap();
    store.send_command(&add.with(4)).unwrap();
    assert_eq!(store.query(&value.item()).unwrap(), 7);
}
