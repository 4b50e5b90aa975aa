//! Fixed-bucket histogram with percentile interpolation, grounded on the
//! `percentile_from_histogram` bucket-interpolation approach: linear
//! interpolation within the bucket containing the target rank, skipping
//! empty buckets.

use std::sync::Mutex;

use serde::Serialize;

/// Upper bounds of each bucket, milliseconds. The last bucket is +infinity.
const BOUNDS_MS: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0,
];

#[derive(Debug)]
pub struct Histogram {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    bucket_counts: Vec<u64>,
    count: u64,
    sum: f64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                bucket_counts: vec![0; BOUNDS_MS.len() + 1],
                count: 0,
                sum: 0.0,
            }),
        }
    }
}

impl Histogram {
    pub fn observe(&self, value_ms: f64) {
        let mut inner = self.inner.lock().unwrap();
        let bucket = BOUNDS_MS
            .iter()
            .position(|&bound| value_ms <= bound)
            .unwrap_or(BOUNDS_MS.len());
        inner.bucket_counts[bucket] += 1;
        inner.count += 1;
        inner.sum += value_ms;
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let inner = self.inner.lock().unwrap();
        HistogramSnapshot {
            p50: percentile(&inner.bucket_counts, inner.count, 0.50),
            p95: percentile(&inner.bucket_counts, inner.count, 0.95),
            p99: percentile(&inner.bucket_counts, inner.count, 0.99),
            avg: if inner.count == 0 {
                None
            } else {
                Some(inner.sum / inner.count as f64)
            },
            count: inner.count,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HistogramSnapshot {
    pub p50: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub avg: Option<f64>,
    pub count: u64,
}

fn percentile(bucket_counts: &[u64], count: u64, p: f64) -> Option<f64> {
    if count == 0 {
        return None;
    }
    let target = p * count as f64;
    let mut cumulative = 0u64;

    for (i, &bc) in bucket_counts.iter().enumerate() {
        if bc == 0 {
            continue;
        }
        cumulative += bc;
        if cumulative as f64 > target {
            let lower = if i == 0 { 0.0 } else { BOUNDS_MS[i - 1] };
            let upper = if i < BOUNDS_MS.len() {
                BOUNDS_MS[i]
            } else {
                return Some(lower);
            };
            let bucket_start_cum = cumulative - bc;
            let fraction = (target - bucket_start_cum as f64) / bc as f64;
            return Some(fraction.mul_add(upper - lower, lower));
        }
    }

    BOUNDS_MS.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let h = Histogram::default();
        let snap = h.snapshot();
        assert_eq!(snap.count, 0);
        assert_eq!(snap.p50, None);
    }

    #[test]
    fn percentiles_increase_with_observations() {
        let h = Histogram::default();
        for v in [1.0, 4.0, 9.0, 20.0, 40.0, 90.0, 200.0, 900.0] {
            h.observe(v);
        }
        let snap = h.snapshot();
        assert_eq!(snap.count, 8);
        assert!(snap.p50.unwrap() < snap.p95.unwrap());
        assert!(snap.p95.unwrap() <= snap.p99.unwrap());
    }
}
