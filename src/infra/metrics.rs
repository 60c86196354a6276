//! Lock-free service counters and Prometheus text formatting
//!
//! Counters are plain relaxed atomics recorded on the request path and
//! rendered on demand for the /metrics endpoint.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Service metrics, shared across request handlers
#[derive(Default)]
pub struct Metrics {
    events_total: AtomicU64,
    enters_admitted_total: AtomicU64,
    exits_total: AtomicU64,
    duplicates_total: AtomicU64,
    full_rejections_total: AtomicU64,
    redirects_offered_total: AtomicU64,
    reservations_confirmed_total: AtomicU64,
    reservations_expired_total: AtomicU64,
    confirms_rejected_total: AtomicU64,
    auth_failures_total: AtomicU64,
    ws_subscribers: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&self) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enter_admitted(&self) {
        self.enters_admitted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exit(&self) {
        self.exits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_full_rejection(&self) {
        self.full_rejections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redirect_offered(&self) {
        self.redirects_offered_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reservation_confirmed(&self) {
        self.reservations_confirmed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reservation_expired(&self) {
        self.reservations_expired_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_confirm_rejected(&self) {
        self.confirms_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ws_connected(&self) {
        self.ws_subscribers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ws_disconnected(&self) {
        // Saturating: a disconnect for a connection counted before a
        // restart must not wrap
        let _ = self.ws_subscribers.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(1))
        });
    }

    /// Format all metrics in Prometheus text exposition format
    pub fn render_prometheus(&self, site: &str) -> String {
        let mut output = String::with_capacity(2048);
        write_metric(
            &mut output,
            "smartqueue_events_total",
            "Total gate events processed",
            MetricType::Counter,
            site,
            self.events_total.load(Ordering::Relaxed),
        );
        write_metric(
            &mut output,
            "smartqueue_enters_admitted_total",
            "Enter events admitted",
            MetricType::Counter,
            site,
            self.enters_admitted_total.load(Ordering::Relaxed),
        );
        write_metric(
            &mut output,
            "smartqueue_exits_total",
            "Exit events processed",
            MetricType::Counter,
            site,
            self.exits_total.load(Ordering::Relaxed),
        );
        write_metric(
            &mut output,
            "smartqueue_duplicate_events_total",
            "Gate events suppressed as duplicates",
            MetricType::Counter,
            site,
            self.duplicates_total.load(Ordering::Relaxed),
        );
        write_metric(
            &mut output,
            "smartqueue_full_rejections_total",
            "Enter events rejected at capacity",
            MetricType::Counter,
            site,
            self.full_rejections_total.load(Ordering::Relaxed),
        );
        write_metric(
            &mut output,
            "smartqueue_redirects_offered_total",
            "Redirect reservations offered",
            MetricType::Counter,
            site,
            self.redirects_offered_total.load(Ordering::Relaxed),
        );
        write_metric(
            &mut output,
            "smartqueue_reservations_confirmed_total",
            "Reservations confirmed",
            MetricType::Counter,
            site,
            self.reservations_confirmed_total.load(Ordering::Relaxed),
        );
        write_metric(
            &mut output,
            "smartqueue_reservations_expired_total",
            "Reservations expired and released",
            MetricType::Counter,
            site,
            self.reservations_expired_total.load(Ordering::Relaxed),
        );
        write_metric(
            &mut output,
            "smartqueue_confirms_rejected_total",
            "Confirmation attempts rejected",
            MetricType::Counter,
            site,
            self.confirms_rejected_total.load(Ordering::Relaxed),
        );
        write_metric(
            &mut output,
            "smartqueue_auth_failures_total",
            "Requests rejected for a missing or invalid API key",
            MetricType::Counter,
            site,
            self.auth_failures_total.load(Ordering::Relaxed),
        );
        write_metric(
            &mut output,
            "smartqueue_ws_subscribers",
            "Currently connected live-update subscribers",
            MetricType::Gauge,
            site,
            self.ws_subscribers.load(Ordering::Relaxed),
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_event();
        metrics.record_event();
        metrics.record_duplicate();
        metrics.ws_connected();

        let output = metrics.render_prometheus("smart-queue");
        assert!(output.contains("smartqueue_events_total{site=\"smart-queue\"} 2"));
        assert!(output.contains("smartqueue_duplicate_events_total{site=\"smart-queue\"} 1"));
        assert!(output.contains("smartqueue_ws_subscribers{site=\"smart-queue\"} 1"));
        assert!(output.contains("# TYPE smartqueue_ws_subscribers gauge"));
    }

    #[test]
    fn test_ws_gauge_never_wraps() {
        let metrics = Metrics::new();
        metrics.ws_disconnected();
        metrics.ws_connected();
        let output = metrics.render_prometheus("s");
        assert!(output.contains("smartqueue_ws_subscribers{site=\"s\"} 1"));
    }
}
