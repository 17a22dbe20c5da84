//! Metrics instrumentation for cdn-router.
//!
//! All metrics are prefixed with `cdn_router.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// How a routed request ended, for metrics labeling.
#[derive(Debug, Clone, Copy)]
pub enum RouteOutcome {
    /// A DNS answer was produced.
    Answer,
    /// An HTTP redirect was produced.
    Redirect,
    /// The request was refused.
    Refused,
    /// The request failed server-side.
    ServFail,
}

/// Record one routed request.
pub fn record_route(protocol: &str, outcome: RouteOutcome, duration: std::time::Duration) {
    let outcome_str = match outcome {
        RouteOutcome::Answer => "answer",
        RouteOutcome::Redirect => "redirect",
        RouteOutcome::Refused => "refused",
        RouteOutcome::ServFail => "servfail",
    };

    counter!("cdn_router.route.count", "protocol" => protocol.to_string(), "outcome" => outcome_str)
        .increment(1);
    histogram!("cdn_router.route.duration.seconds", "protocol" => protocol.to_string())
        .record(duration.as_secs_f64());
}

/// Record one monitor poll cycle.
pub fn record_poll(target: &str, success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("cdn_router.poll.count", "target" => target.to_string(), "result" => result)
        .increment(1);
}

/// Record a snapshot build and how many entries it dropped.
pub fn record_snapshot_build(entry_errors: usize) {
    counter!("cdn_router.snapshot.build.count").increment(1);
    counter!("cdn_router.snapshot.build.entry_errors").increment(entry_errors as u64);
}

/// Record the shape of the published snapshot.
pub fn record_snapshot_counts(delivery_services: usize, caches: usize, zones: usize) {
    gauge!("cdn_router.snapshot.delivery_services.count").set(delivery_services as f64);
    gauge!("cdn_router.snapshot.caches.count").set(caches as f64);
    gauge!("cdn_router.snapshot.zones.count").set(zones as f64);
}

/// Record a configuration reload attempt.
pub fn record_reload(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("cdn_router.reload.count", "result" => result).increment(1);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
