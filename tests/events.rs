mod common;

use common::Recorder;
use loomstate::{CommandDef, CommandOutput, EventDef, StateDef, Store};

#[test]
fn verbatim_events_deliver_their_payload() {
    let saved: EventDef<String> = EventDef::new("saved");
    let store = Store::new();
    let seen: Recorder<String> = Recorder::new();
    let _sub = store
        .subscribe_event(&saved, {
            let seen = seen.clone();
            move |value| seen.push(value.clone())
        })
        .unwrap();

    store.emit_event(&saved.with("draft-1".to_string())).unwrap();
    store.emit_event(&saved.with("draft-2".to_string())).unwrap();
    assert_eq!(
        seen.snapshot(),
        vec!["draft-1".to_string(), "draft-2".to_string()]
    );
}

#[test]
fn computed_events_read_values_at_the_emission_point() {
    let count: StateDef<(), i32> = StateDef::new("count", |_| 7);
    let reported: EventDef<(), i32> = EventDef::computed("reported", {
        let count = count.clone();
        move |ctx, _| ctx.get(&count.item())
    });

    let store = Store::new();
    let seen: Recorder<i32> = Recorder::new();
    let _sub = store
        .subscribe_event(&reported, {
            let seen = seen.clone();
            move |value| seen.push(*value)
        })
        .unwrap();

    store.emit_event(&reported.item()).unwrap();
    assert_eq!(seen.snapshot(), vec![7]);
}

#[test]
fn emitting_without_subscribers_is_a_noop() {
    let saved: EventDef<String> = EventDef::new("saved");
    let store = Store::new();
    store.emit_event(&saved.with("nobody".to_string())).unwrap();
}

#[test]
fn commands_can_emit_events_between_writes() {
    let count: StateDef<(), i32> = StateDef::new("count", |_| 0);
    let announced: EventDef<(), i32> = EventDef::computed("announced", {
        let count = count.clone();
        move |ctx, _| ctx.get(&count.item())
    });
    let bump = CommandDef::new("bump", {
        let count = count.clone();
        let announced = announced.clone();
        move |ctx, _: &()| {
            let current = ctx.get(&count.item());
            CommandOutput::list([
                count.item().set(current + 1),
                // Computed at the emission point: the write above is visible.
                announced.item().emit(),
            ])
        }
    });

    let store = Store::new();
    let seen: Recorder<i32> = Recorder::new();
    let _sub = store
        .subscribe_event(&announced, {
            let seen = seen.clone();
            move |value| seen.push(*value)
        })
        .unwrap();

    store.send_command(&bump.item()).unwrap();
    store.send_command(&bump.item()).unwrap();
    assert_eq!(seen.snapshot(), vec![1, 2]);
}

#[test]
fn unsubscribed_handlers_stop_receiving() {
    let saved: EventDef<String> = EventDef::new("saved");
    let store = Store::new();
    let seen: Recorder<String> = Recorder::new();
    let sub = store
        .subscribe_event(&saved, {
            let seen = seen.clone();
            move |value| seen.push(value.clone())
        })
        .unwrap();

    store.emit_event(&saved.with("before".to_string())).unwrap();
    sub.unsubscribe();
    store.emit_event(&saved.with("after".to_string())).unwrap();
    assert_eq!(seen.snapshot(), vec!["before".to_string()]);
}
