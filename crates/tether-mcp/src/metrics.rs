//! Per-session request counters.

use serde::Serialize;
use std::time::Duration;

/// Counters for one client session. Reset only by constructing a new client.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientMetrics {
    pub requests_sent: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub notifications_received: u64,
    pub connection_count: u64,
    /// Running mean over successful requests, in milliseconds.
    pub avg_response_time_ms: f64,
}

impl ClientMetrics {
    pub(crate) fn record_sent(&mut self) {
        self.requests_sent += 1;
    }

    pub(crate) fn record_success(&mut self, duration: Duration) {
        self.requests_succeeded += 1;
        let n = self.requests_succeeded as f64;
        let sample = duration.as_secs_f64() * 1000.0;
        self.avg_response_time_ms = (self.avg_response_time_ms * (n - 1.0) + sample) / n;
    }

    pub(crate) fn record_failure(&mut self) {
        self.requests_failed += 1;
    }

    pub(crate) fn record_notification(&mut self) {
        self.notifications_received += 1;
    }

    pub(crate) fn record_connection(&mut self) {
        self.connection_count += 1;
    }

    /// Requests sent but not yet settled either way.
    pub fn in_flight(&self) -> u64 {
        self.requests_sent
            .saturating_sub(self.requests_succeeded + self.requests_failed)
    }
}
