//! Prometheus text exposition for /metrics
//!
//! Reads `Metrics::snapshot()`, so scraping never resets the periodic
//! report counters.

use crate::infra::metrics::{Metrics, ScrapeSnapshot, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

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

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let snapshot = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_upload_metrics(&mut output, site_id, &snapshot);
    write_gate_metrics(&mut output, site_id, &snapshot);
    write_vision_metrics(&mut output, site_id, &snapshot);

    output
}

fn write_upload_metrics(output: &mut String, site: &str, s: &ScrapeSnapshot) {
    write_metric(
        output,
        "plate_gate_uploads_total",
        "Total uploads processed",
        MetricType::Counter,
        site,
        s.uploads_total,
    );

    let _ = writeln!(output, "# HELP plate_gate_decisions_total Access decisions by outcome");
    let _ = writeln!(output, "# TYPE plate_gate_decisions_total counter");
    for (status, val) in
        [("GRANTED", s.granted_total), ("DENIED", s.denied_total), ("FAILED", s.failed_total)]
    {
        let _ = writeln!(
            output,
            "plate_gate_decisions_total{{site=\"{site}\",status=\"{status}\"}} {val}"
        );
    }

    write_metric(
        output,
        "plate_gate_registry_errors_total",
        "Decisions aborted because the registry was unavailable",
        MetricType::Counter,
        site,
        s.registry_errors_total,
    );

    write_histogram(
        output,
        "plate_gate_pipeline_latency_ms",
        "Upload processing latency in milliseconds",
        site,
        &s.latency_buckets,
        &METRICS_BUCKET_BOUNDS,
        s.latency_sum_ms,
    );
}

fn write_gate_metrics(output: &mut String, site: &str, s: &ScrapeSnapshot) {
    write_metric(
        output,
        "plate_gate_gate_triggers_total",
        "Gate open triggers (automatic and manual)",
        MetricType::Counter,
        site,
        s.gate_triggers_total,
    );
    write_metric(
        output,
        "plate_gate_gate_auto_closes_total",
        "Gate closes performed by the auto-close timer",
        MetricType::Counter,
        site,
        s.gate_auto_closes_total,
    );
    write_metric(
        output,
        "plate_gate_gate_open",
        "Current gate state (0=closed, 1=open)",
        MetricType::Gauge,
        site,
        s.gate_open,
    );
}

fn write_vision_metrics(output: &mut String, site: &str, s: &ScrapeSnapshot) {
    write_metric(
        output,
        "plate_gate_detector_failures_total",
        "Detector unavailable or inference failed",
        MetricType::Counter,
        site,
        s.detector_failures_total,
    );
    write_metric(
        output,
        "plate_gate_ocr_requests_total",
        "OCR requests sent",
        MetricType::Counter,
        site,
        s.ocr_requests_total,
    );
    write_metric(
        output,
        "plate_gate_ocr_failures_total",
        "OCR timeouts and service errors",
        MetricType::Counter,
        site,
        s.ocr_failures_total,
    );
}
