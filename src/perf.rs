use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Opt-in per-dispatch counters
///
/// Allocated only when performance hooks are enabled; every field is a
/// relaxed atomic so recording never contends with request processing.
#[derive(Debug, Default)]
pub struct PerfHooks {
    requests: AtomicU64,
    dispatch_nanos: AtomicU64,
    route_cache_hits: AtomicU64,
    route_cache_misses: AtomicU64,
    bytes_out: AtomicU64,
}

impl PerfHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_dispatch(&self, elapsed: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.dispatch_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.route_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.route_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes_out(&self, n: usize) {
        self.bytes_out.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Point-in-time view of the counters
    pub fn snapshot(&self) -> PerfSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let dispatch_nanos = self.dispatch_nanos.load(Ordering::Relaxed);
        PerfSnapshot {
            requests,
            avg_dispatch_micros: if requests == 0 {
                0.0
            } else {
                dispatch_nanos as f64 / requests as f64 / 1000.0
            },
            route_cache_hits: self.route_cache_hits.load(Ordering::Relaxed),
            route_cache_misses: self.route_cache_misses.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PerfSnapshot {
    pub requests: u64,
    pub avg_dispatch_micros: f64,
    pub route_cache_hits: u64,
    pub route_cache_misses: u64,
    pub bytes_out: u64,
}
