use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

#[derive(Debug, Default)]
pub struct Metrics {
    request_total: AtomicU64,
    request_success: AtomicU64,
    request_error: AtomicU64,
    denied: AtomicU64,
    invariant_violations: AtomicU64,
    infrastructure_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.request_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.request_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.request_error.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a failed response once more under its class.
    pub fn record_failure_status(&self, status: StatusCode) {
        let counter = match status {
            StatusCode::FORBIDDEN => &self.denied,
            StatusCode::CONFLICT => &self.invariant_violations,
            s if s.is_server_error() => &self.infrastructure_failures,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_total(&self) -> u64 {
        self.request_total.load(Ordering::Relaxed)
    }

    pub fn request_success(&self) -> u64 {
        self.request_success.load(Ordering::Relaxed)
    }

    pub fn request_error(&self) -> u64 {
        self.request_error.load(Ordering::Relaxed)
    }

    pub fn denied(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }

    pub fn invariant_violations(&self) -> u64 {
        self.invariant_violations.load(Ordering::Relaxed)
    }

    pub fn infrastructure_failures(&self) -> u64 {
        self.infrastructure_failures.load(Ordering::Relaxed)
    }

    pub fn render_prometheus(&self) -> String {
        let counters = [
            (
                "orgdir_requests_total",
                "Total number of requests.",
                self.request_total(),
            ),
            (
                "orgdir_requests_success_total",
                "Total successful requests.",
                self.request_success(),
            ),
            (
                "orgdir_requests_error_total",
                "Total failed requests.",
                self.request_error(),
            ),
            (
                "orgdir_access_denied_total",
                "Requests refused by policy or scope.",
                self.denied(),
            ),
            (
                "orgdir_invariant_violations_total",
                "Requests rejected by a directory invariant.",
                self.invariant_violations(),
            ),
            (
                "orgdir_infrastructure_failures_total",
                "Requests failed by storage, deadline or internal errors.",
                self.infrastructure_failures(),
            ),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {name} {help}");
            let _ = writeln!(output, "# TYPE {name} counter");
            let _ = writeln!(output, "{name} {value}");
        }
        output
    }
}

pub async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics.render_prometheus(),
    )
}
