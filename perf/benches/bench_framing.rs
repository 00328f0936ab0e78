use cinnabar_core::assembler::FrameHeader;
use cinnabar_core::slot::{FAST_SLOT_BUF, FrameSlot};
use cinnabar_perf::make_partial;
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use galena_msg::Ttl;

fn bench_complete_frame(c: &mut Criterion) {
    let header = FrameHeader::new("FIX.4.4", 0x01);
    let partial = make_partial();
    let mut slot = FrameSlot::<FAST_SLOT_BUF>::new();
    assert!(slot.stage(&partial, "8", Ttl::default()));

    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(partial.len() as u64));

    let mut seq = 0u64;
    group.bench_function("complete_frame", |b| {
        b.iter(|| {
            seq += 1;
            let (buf, len) = slot.framing_buf();
            let range = header.complete_frame(buf, len, "8", black_box(seq));
            black_box(range.len())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_complete_frame);
criterion_main!(benches);
