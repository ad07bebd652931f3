//! Request counters and the monotonic clock backing them.

use std::time::Instant;

/// Process-wide request statistics.
///
/// Single-writer by construction: the event loop thread owns the only copy,
/// so plain fields suffice and updates are totally ordered.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestStats {
    pub total_requests: u64,
    pub bad_frames: u64,
    pub routes_installed: u64,
    pub last_latency_ms: f64,
    pub avg_latency_ms: f64,
}

impl RequestStats {
    /// Account one handled request and fold its latency into the running
    /// mean: `avg += (x - avg) / n` with `n` already incremented.
    pub fn record_request(&mut self, latency_ms: f64) {
        self.total_requests += 1;
        self.last_latency_ms = latency_ms;
        self.avg_latency_ms += (latency_ms - self.avg_latency_ms) / self.total_requests as f64;
    }
}

/// Monotonic millisecond clock anchored at construction.
///
/// Only deltas are observable: latencies, uptime, and the 32-bit install
/// stamps on route entries.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Clock {
            start: Instant::now(),
        }
    }
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Milliseconds since the clock was created, with sub-millisecond
    /// resolution for latency math.
    pub fn now_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Low 32 bits of the millisecond clock, used to stamp route entries.
    pub fn timestamp_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}
