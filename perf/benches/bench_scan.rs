use cinnabar_core::assembler::FrameHeader;
use cinnabar_core::slot::{FAST_SLOT_BUF, FrameSlot};
use cinnabar_core::splitter::FrameScanner;
use cinnabar_perf::make_partial;
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use galena_msg::Ttl;

/// One complete wire frame built by the real framer.
fn framed_bytes() -> Vec<u8> {
    let header = FrameHeader::new("FIX.4.4", 0x01);
    let partial = make_partial();
    let mut slot = FrameSlot::<FAST_SLOT_BUF>::new();
    assert!(slot.stage(&partial, "8", Ttl::default()));
    let (buf, len) = slot.framing_buf();
    let range = header.complete_frame(buf, len, "8", 1);
    buf[range].to_vec()
}

fn bench_scan(c: &mut Criterion) {
    let frame = framed_bytes();
    // a stream of 16 back-to-back frames
    let mut stream = Vec::with_capacity(frame.len() * 16);
    for _ in 0..16 {
        stream.extend_from_slice(&frame);
    }

    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("extract_16_frames", |b| {
        let mut scanner = FrameScanner::new(b"8=FIX.4.4\x019=", 0x01);
        b.iter(|| {
            let mut frames = 0usize;
            scanner.consume(black_box(&stream), |f| {
                frames += 1;
                black_box(f.len());
            });
            black_box(frames)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_scan);
criterion_main!(benches);
