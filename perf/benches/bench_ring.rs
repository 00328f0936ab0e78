use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use galena_ring::RingBuffer;

fn bench_publish_consume(c: &mut Criterion) {
    let ring: RingBuffer<u64, 65536, 2> = RingBuffer::new(|_| 0);
    let (handle, start) = ring.register_consumer().expect("barrier free");
    let mut next = start + 1;

    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Elements(1));

    group.bench_function("publish_then_consume", |b| {
        b.iter(|| {
            let seq = ring.acquire_publisher_slot();
            unsafe { *ring.acquire_entry(seq) = black_box(seq) };
            ring.commit_publisher_slot(seq);

            let committed = ring.wait_for(next);
            for s in next..=committed {
                black_box(unsafe { *ring.show_entry(s) });
                ring.release_entry(&handle, s);
            }
            next = committed + 1;
        });
    });

    group.finish();
}

fn bench_empty_poll(c: &mut Criterion) {
    let ring: RingBuffer<u64, 1024, 1> = RingBuffer::new(|_| 0);
    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Elements(1));

    group.bench_function("try_wait_for (empty)", |b| {
        b.iter(|| black_box(ring.try_wait_for(1)));
    });

    group.finish();
}

criterion_group!(benches, bench_publish_consume, bench_empty_poll);
criterion_main!(benches);
