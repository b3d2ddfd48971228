use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use loomstate::{CommandDef, StateDef, Store};

const BATCH_SIZES: &[usize] = &[64, 256, 1024];

fn dispatch_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_dispatch");

    for &batch in BATCH_SIZES {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &size| {
            b.iter(|| {
                let count: StateDef<(), i64> = StateDef::new("count", |_| 0);
                let incre = CommandDef::new("incre", {
                    let count = count.clone();
                    move |ctx, _: &()| {
                        let current = ctx.get(&count.item());
                        count.item().set(current + 1)
                    }
                });
                let store = Store::new();
                for _ in 0..size {
                    store.send_command(&incre.item()).expect("dispatch");
                }
                assert_eq!(store.query(&count.item()).expect("read"), size as i64);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, dispatch_throughput);
criterion_main!(benches);
