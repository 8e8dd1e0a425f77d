use std::sync::Arc;
use std::thread;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use fabline_infra::StockLedger;
use fabline_infra::store::{ProductSeed, Stores};

/// Single writer: cost of one compare-and-update cycle.
fn bench_single_writer(c: &mut Criterion) {
    let stores = Stores::in_memory();
    let seeded = stores
        .seed(&ProductSeed::new("dome").material("lens", 0))
        .expect("seed");
    let ledger = StockLedger::new(&stores, 8);
    let id = seeded.material_ids[0];

    c.bench_function("ledger/add_ordered", |b| {
        b.iter(|| black_box(ledger.add_ordered(id, 1).expect("order")))
    });
}

/// Many writers racing on the same material counter.
fn bench_contended_orders(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger/contended_orders");
    const ORDERS_PER_THREAD: u64 = 200;

    for threads in [1usize, 2, 4, 8] {
        group.throughput(Throughput::Elements(threads as u64 * ORDERS_PER_THREAD));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                let stores = Stores::in_memory();
                let seeded = stores
                    .seed(&ProductSeed::new("dome").material("lens", 0))
                    .expect("seed");
                let ledger = Arc::new(StockLedger::new(&stores, u32::MAX));
                let id = seeded.material_ids[0];

                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let ledger = ledger.clone();
                        thread::spawn(move || {
                            for _ in 0..ORDERS_PER_THREAD {
                                ledger.add_ordered(id, 1).expect("order");
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().expect("join");
                }
                black_box(ledger.material(id).expect("material"))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_single_writer, bench_contended_orders);
criterion_main!(benches);
