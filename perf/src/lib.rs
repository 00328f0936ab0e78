//! Shared measurement helpers for the gateway benchmarks.

use std::time::Instant;

// ─── Statistics ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub median: u64,
    pub stddev: f64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub p999: u64,
    pub count: usize,
}

pub fn compute_stats(samples: &mut [u64]) -> Stats {
    assert!(!samples.is_empty(), "cannot compute stats on empty samples");
    samples.sort_unstable();

    let count = samples.len();
    let sum: u64 = samples.iter().sum();
    let mean = sum as f64 / count as f64;

    let variance = samples
        .iter()
        .map(|&x| {
            let diff = x as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / count as f64;

    Stats {
        min: samples[0],
        max: samples[count - 1],
        mean,
        median: percentile_sorted(samples, 50.0),
        stddev: variance.sqrt(),
        p50: percentile_sorted(samples, 50.0),
        p90: percentile_sorted(samples, 90.0),
        p99: percentile_sorted(samples, 99.0),
        p999: percentile_sorted(samples, 99.9),
        count,
    }
}

fn percentile_sorted(sorted: &[u64], pct: f64) -> u64 {
    let len = sorted.len();
    if len == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0 * len as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(len - 1);
    sorted[idx]
}

/// Renders a named result as one JSON line, for appending to a run log.
pub fn stats_json(name: &str, unit: &str, stats: &Stats) -> String {
    serde_json::json!({ "name": name, "unit": unit, "stats": stats }).to_string()
}

/// Returns the current monotonic time in nanoseconds.
#[inline(always)]
pub fn now_ns() -> u64 {
    let mut ts: libc::timespec = unsafe { core::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// Times `iterations` runs of `f`, returning per-iteration nanoseconds.
pub fn measure(iterations: usize, mut f: impl FnMut()) -> Vec<u64> {
    let mut samples = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let start = Instant::now();
        f();
        samples.push(start.elapsed().as_nanos() as u64);
    }
    samples
}

// ─── Test data ──────────────────────────────────────────────────────────────

/// A representative execution-report partial: separator-led, `|10=`
/// terminated, ready for `push`.
pub fn make_partial() -> Vec<u8> {
    "|49=BRKR|56=INVMGR|52=20240102-10:31:22.459|37=ORD10001|11=CL10001|17=EX10001|\
     39=0|55=MSFT|54=1|38=5000|44=31.25|10="
        .replace('|', "\x01")
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_on_a_known_distribution() {
        let mut samples: Vec<u64> = (1..=100).collect();
        let s = compute_stats(&mut samples);
        assert_eq!(s.min, 1);
        assert_eq!(s.max, 100);
        assert_eq!(s.count, 100);
        assert_eq!(s.p50, 50);
        assert_eq!(s.p99, 99);
        assert!((s.mean - 50.5).abs() < 1e-9);
    }

    #[test]
    fn partial_is_well_formed() {
        let p = make_partial();
        assert_eq!(p[0], 0x01);
        assert!(p.ends_with(b"\x0110="));
    }

    #[test]
    fn stats_serialize_to_one_json_line() {
        let mut samples: Vec<u64> = (1..=10).collect();
        let line = stats_json("framing", "ns", &compute_stats(&mut samples));
        assert!(line.contains("\"name\":\"framing\""));
        assert!(!line.contains('\n'));
    }
}
