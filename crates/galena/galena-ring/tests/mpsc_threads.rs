//! Concurrent producer/consumer integration test for the barrier ring.
//!
//! Spawns several producer threads and a consumer thread sharing one
//! [`RingBuffer`], with a ring deliberately much smaller than the message
//! count so publishers must lap and the barrier gating is exercised for
//! real. Validates:
//!
//! 1. No message is lost or duplicated under contention
//! 2. Each producer's messages arrive in that producer's publish order
//! 3. The committed prefix is dense (the consumer never observes a gap)

use galena_ring::RingBuffer;
use std::sync::Arc;
use std::thread;

const PRODUCERS: u64 = 4;
const PER_PRODUCER: u64 = 10_000;

/// Encode (producer id, payload counter) into one u64 so a slot stays POD.
fn encode(producer: u64, n: u64) -> u64 {
    (producer << 32) | n
}

#[test]
fn contended_producers_single_consumer() {
    let ring: Arc<RingBuffer<u64, 256, 2>> = Arc::new(RingBuffer::new(|_| 0));
    let (handle, start) = ring.register_consumer().expect("barrier free");
    assert_eq!(start, 0);

    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let ring = Arc::clone(&ring);
        producers.push(thread::spawn(move || {
            for n in 0..PER_PRODUCER {
                let seq = ring.acquire_publisher_slot();
                unsafe { *ring.acquire_entry(seq) = encode(p, n) };
                ring.commit_publisher_slot(seq);
            }
        }));
    }

    let total = PRODUCERS * PER_PRODUCER;
    let consumer = {
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            let mut next_per_producer = [0u64; PRODUCERS as usize];
            let mut seen = 0u64;
            let mut next_seq = 1u64;
            while seen < total {
                let committed = ring.wait_for(next_seq);
                for seq in next_seq..=committed {
                    let value = unsafe { *ring.show_entry(seq) };
                    let producer = (value >> 32) as usize;
                    let n = value & 0xffff_ffff;
                    assert_eq!(
                        n, next_per_producer[producer],
                        "producer {producer} reordered"
                    );
                    next_per_producer[producer] += 1;
                    seen += 1;
                    ring.release_entry(&handle, seq);
                }
                next_seq = committed + 1;
            }
            (seen, next_per_producer, handle)
        })
    };

    for p in producers {
        p.join().expect("producer panicked");
    }
    let (seen, per_producer, handle) = consumer.join().expect("consumer panicked");

    assert_eq!(seen, total);
    for count in per_producer {
        assert_eq!(count, PER_PRODUCER);
    }
    ring.unregister(handle);
}

#[test]
fn two_barriers_gate_slot_reuse() {
    let ring: Arc<RingBuffer<u64, 8, 2>> = Arc::new(RingBuffer::new(|_| 0));
    let (fast, _) = ring.register_consumer().expect("barrier free");
    let (slow, _) = ring.register_consumer().expect("barrier free");

    // Fill the ring; the fast consumer releases everything, the slow one
    // holds the line, so the publisher must still report "not ready".
    for seq in 1..=8u64 {
        let claimed = ring.try_acquire_publisher_slot().expect("ring has room");
        assert_eq!(claimed, seq);
        ring.commit_publisher_slot(claimed);
        ring.release_entry(&fast, claimed);
    }
    assert!(ring.try_acquire_publisher_slot().is_none());

    ring.release_entry(&slow, 3);
    // Three slots were released by everyone, so three claims succeed.
    for expected in 9..=11u64 {
        assert_eq!(ring.try_acquire_publisher_slot(), Some(expected));
        ring.commit_publisher_slot(expected);
    }
    assert!(ring.try_acquire_publisher_slot().is_none());

    ring.unregister(fast);
    ring.unregister(slow);
}
