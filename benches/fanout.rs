use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use duplexrt::prelude::{DataBus, Discipline};

#[derive(Debug)]
struct Quote {
    bid: f64,
    ask: f64,
}

fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("data_plane_fanout");
    group.throughput(Throughput::Elements(1));

    for discipline in [Discipline::ReliableFifo, Discipline::RealtimeLatest] {
        for &subs in &[1usize, 4, 16] {
            let bus = DataBus::new();
            let queues: Vec<_> = (0..subs)
                .map(|_| bus.subscribe_stream::<Quote>("quotes", discipline).unwrap())
                .collect();
            let payload = Arc::new(Quote { bid: 1.0, ask: 1.5 });

            let id = BenchmarkId::new(format!("{discipline:?}"), subs);
            group.bench_function(id, |b| {
                b.iter(|| {
                    black_box(bus.publish_stream("quotes", payload.clone()));
                    for q in &queues {
                        if let Some(v) = q.try_pop() {
                            black_box(v.ask - v.bid);
                        }
                    }
                });
            });
        }
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_secs(3))
        .sample_size(20);
    targets = bench_fanout
}
criterion_main!(benches);
