use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use loomstate::{CommandDef, DomainDef, QueryDef, StateDef, Store, StoreError, StreamDef};
use tokio::time::sleep;

#[tokio::test]
async fn triggered_values_flow_through_the_pipeline_into_dispatch() {
    let value: StateDef<(), i32> = StateDef::new("value", |_| 0);
    let apply = StreamDef::new("apply", {
        let value = value.clone();
        move |_ctx, input: BoxStream<'static, i32>| {
            let value = value.clone();
            input.map(move |next| value.item().set(next)).boxed()
        }
    });

    let store = Store::new();
    store.send_command(&apply.with(5)).unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(store.query(&value.item()).unwrap(), 5);
}

#[tokio::test]
async fn pipelines_start_at_most_once_and_share_their_input() {
    let opened = Arc::new(AtomicUsize::new(0));
    let total: StateDef<(), i32> = StateDef::new("total", |_| 0);
    let accumulate = StreamDef::new("accumulate", {
        let opened = Arc::clone(&opened);
        let total = total.clone();
        move |_ctx, mut input: BoxStream<'static, i32>| {
            opened.fetch_add(1, Ordering::SeqCst);
            let total = total.clone();
            let stream = async_stream::stream! {
                let mut sum = 0;
                while let Some(next) = input.next().await {
                    sum += next;
                    yield total.item().set(sum);
                }
            };
            stream.boxed()
        }
    });

    let store = Store::new();
    store.send_command(&accumulate.with(1)).unwrap();
    store.send_command(&accumulate.with(2)).unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(store.query(&total.item()).unwrap(), 3);
}

#[derive(Clone)]
struct MirrorApi {
    set: CommandDef<i32>,
    mirror: QueryDef<(), i32>,
}

fn mirror_domain() -> DomainDef<MirrorApi> {
    DomainDef::new("mirror", |ctx| {
        let source = ctx.state("source", |_: &()| 0);
        let doubled = ctx.query("doubled", {
            let source = source.clone();
            move |ctx, _: &()| ctx.get(&source.item()) * 2
        });
        let shadow = ctx.state("shadow", |_: &()| 0);
        let mirror = ctx.query("mirror", {
            let shadow = shadow.clone();
            move |ctx, _: &()| ctx.get(&shadow.item())
        });
        let set = ctx.command("set", {
            let source = source.clone();
            move |_ctx, next: &i32| source.item().set(*next)
        });
        ctx.command_stream("sync", {
            let doubled = doubled.clone();
            let shadow = shadow.clone();
            move |sctx, _input: BoxStream<'static, ()>| {
                let changes = sctx.from_query(&doubled.item());
                let shadow = shadow.clone();
                changes.map(move |next| shadow.item().set(next)).boxed()
            }
        });
        MirrorApi { set, mirror }
    })
}

#[tokio::test]
async fn domain_subscription_ignites_pipelines_fed_by_query_changes() {
    let domain = mirror_domain();
    let store = Store::new();
    let _sub = store.subscribe_domain(&domain).unwrap();
    let api = store.get_domain(&domain).unwrap();

    store.send_command(&api.set.with(5)).unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(store.query(&api.mirror.item()).unwrap(), 10);

    store.send_command(&api.set.with(8)).unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(store.query(&api.mirror.item()).unwrap(), 16);
}

#[tokio::test]
async fn destroy_stops_pipelines_and_rejects_further_triggers() {
    let value: StateDef<(), i32> = StateDef::new("value", |_| 0);
    let apply = StreamDef::new("apply", {
        let value = value.clone();
        move |_ctx, input: BoxStream<'static, i32>| {
            let value = value.clone();
            input.map(move |next| value.item().set(next)).boxed()
        }
    });

    let store = Store::new();
    store.send_command(&apply.with(1)).unwrap();
    sleep(Duration::from_millis(50)).await;

    store.destroy();
    assert!(matches!(
        store.send_command(&apply.with(2)),
        Err(StoreError::Destroyed { .. })
    ));
    // Give the aborted task a beat; nothing should panic or deliver.
    sleep(Duration::from_millis(20)).await;
}
