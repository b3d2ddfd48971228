use std::sync::{Arc, OnceLock};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use loomstate::{CommandDef, QueryDef, StateDef, Store};

const DEPTHS: &[u32] = &[16, 128, 512];

fn chain_store(depth: u32) -> (Store, QueryDef<u32, i64>, CommandDef<i64>) {
    let base: StateDef<(), i64> = StateDef::new("base", |_| 0);
    let slot: Arc<OnceLock<QueryDef<u32, i64>>> = Arc::new(OnceLock::new());
    let chain = QueryDef::new("chain", {
        let slot = Arc::clone(&slot);
        let base = base.clone();
        move |ctx, depth: &u32| {
            if *depth == 0 {
                ctx.get(&base.item())
            } else {
                ctx.get(&slot.get().expect("chain registered").with(depth - 1)) + 1
            }
        }
    });
    slot.set(chain.clone()).ok();
    let set_base = CommandDef::new("set_base", {
        let base = base.clone();
        move |_ctx, next: &i64| base.item().set(*next)
    });

    let store = Store::new();
    store.query(&chain.with(depth)).expect("materialize chain");
    (store, chain, set_base)
}

fn invalidation_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("invalidation_chain");

    for &depth in DEPTHS {
        group.throughput(Throughput::Elements(u64::from(depth)));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let (store, chain, set_base) = chain_store(depth);
            let mut next = 0i64;
            b.iter(|| {
                next += 1;
                store.send_command(&set_base.with(next)).expect("dispatch");
                assert_eq!(
                    store.query(&chain.with(depth)).expect("read"),
                    i64::from(depth) + next
                );
            });
        });
    }

    group.finish();
}

criterion_group!(benches, invalidation_chain);
criterion_main!(benches);
