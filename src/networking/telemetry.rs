//! Round-trip latency and throughput accounting for one session
//!
//! Windowed accumulators are averaged and reset every telemetry window.
//! Partial-frame, send-timeout and expired-request counters run for the
//! whole session.
//! Nothing in the sync path reads these numbers back.

use std::time::{Duration, Instant};

/// Averages published at the end of a telemetry window
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub avg_latency_ms: f64,
    pub avg_in_flight: f64,
    /// Receive attempts that timed out before each successful read
    pub avg_receive_cycles: f64,
    pub responses: u32,
    pub partial_frames: u64,
    pub send_timeouts: u64,
    /// Requests dropped from the in-flight queue without a response
    pub expired_requests: u64,
    pub window: Duration,
    pub published_at: Instant,
}

#[derive(Debug)]
pub struct TelemetryTracker {
    window: Duration,
    window_started: Instant,

    latency_total: Duration,
    in_flight_total: u64,
    responses: u32,
    receive_cycles_total: u64,
    receives: u32,
    cycles_since_receive: u64,

    partial_frames: u64,
    send_timeouts: u64,
    expired_requests: u64,
}

impl TelemetryTracker {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    pub fn starting_at(window: Duration, now: Instant) -> Self {
        Self {
            window,
            window_started: now,
            latency_total: Duration::ZERO,
            in_flight_total: 0,
            responses: 0,
            receive_cycles_total: 0,
            receives: 0,
            cycles_since_receive: 0,
            partial_frames: 0,
            send_timeouts: 0,
            expired_requests: 0,
        }
    }

    /// A response frame was matched against a pending request
    pub fn record_response(&mut self, latency: Duration, in_flight: usize) {
        self.latency_total += latency;
        self.in_flight_total += in_flight as u64;
        self.responses += 1;
    }

    pub fn record_receive_timeout(&mut self) {
        self.cycles_since_receive += 1;
    }

    /// Bytes arrived; closes the current run of receive timeouts
    pub fn record_receive(&mut self) {
        self.receive_cycles_total += self.cycles_since_receive;
        self.receives += 1;
        self.cycles_since_receive = 0;
    }

    pub fn record_partial_frame(&mut self) {
        self.partial_frames += 1;
    }

    pub fn record_send_timeout(&mut self) {
        self.send_timeouts += 1;
    }

    pub fn record_expired(&mut self, count: usize) {
        self.expired_requests += count as u64;
    }

    /// Publish and reset the window once it has elapsed
    pub fn maybe_publish(&mut self, now: Instant) -> Option<TelemetrySnapshot> {
        let elapsed = now.saturating_duration_since(self.window_started);
        if elapsed < self.window {
            return None;
        }

        let snapshot = TelemetrySnapshot {
            avg_latency_ms: average(self.latency_total.as_secs_f64() * 1000.0, self.responses),
            avg_in_flight: average(self.in_flight_total as f64, self.responses),
            avg_receive_cycles: average(self.receive_cycles_total as f64, self.receives),
            responses: self.responses,
            partial_frames: self.partial_frames,
            send_timeouts: self.send_timeouts,
            expired_requests: self.expired_requests,
            window: elapsed,
            published_at: now,
        };

        self.window_started = now;
        self.latency_total = Duration::ZERO;
        self.in_flight_total = 0;
        self.responses = 0;
        self.receive_cycles_total = 0;
        self.receives = 0;

        Some(snapshot)
    }
}

fn average(total: f64, count: u32) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}
