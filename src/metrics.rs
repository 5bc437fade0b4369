//! In-process counters exposed on `/metrics` in Prometheus text format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use dashmap::DashMap;

use crate::pipeline::prompt::RECOMMENDATION_SOURCES;

/// Latency bucket upper bounds in milliseconds.  Generation dominates, so
/// the range reaches well past the per-call timeout.
const LATENCY_BUCKETS_MS: [u64; 10] = [10, 50, 100, 250, 500, 1000, 2500, 5000, 10000, 30000];

const FALLBACK_CAUSES: [&str; 3] = ["generation_error", "no_json", "incomplete"];

pub struct ServiceMetrics {
    requests_total: AtomicU64,
    succeeded_total: AtomicU64,
    fallbacks: [AtomicU64; 3],
    rejections: DashMap<u16, u64>,
    site_clicks: DashMap<&'static str, u64>,
    hist_counts: Vec<AtomicU64>,
    hist_sum_ms: AtomicU64,
    hist_count: AtomicU64,
    start_epoch: f64,
    start_instant: Instant,
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        let start_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Self {
            requests_total: AtomicU64::new(0),
            succeeded_total: AtomicU64::new(0),
            fallbacks: Default::default(),
            rejections: DashMap::new(),
            site_clicks: DashMap::new(),
            hist_counts: LATENCY_BUCKETS_MS.iter().map(|_| AtomicU64::new(0)).collect(),
            hist_sum_ms: AtomicU64::new(0),
            hist_count: AtomicU64::new(0),
            start_epoch,
            start_instant: Instant::now(),
        }
    }
}

impl ServiceMetrics {
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.succeeded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self, cause_label: &str) {
        if let Some(idx) = FALLBACK_CAUSES.iter().position(|c| *c == cause_label) {
            self.fallbacks[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rejection(&self, status: StatusCode) {
        *self.rejections.entry(status.as_u16()).or_insert(0) += 1;
    }

    /// Count a click on a recommended site.  Names outside the known menu are
    /// folded into `other` so clients cannot grow the label set.
    pub fn record_site_click(&self, site_name: Option<&str>) {
        let label = site_name
            .map(str::trim)
            .and_then(|name| RECOMMENDATION_SOURCES.iter().find(|s| s.name == name))
            .map(|s| s.name)
            .unwrap_or("other");
        *self.site_clicks.entry(label).or_insert(0) += 1;
    }

    pub fn site_clicks(&self, label: &str) -> u64 {
        self.site_clicks.get(label).map(|v| *v).unwrap_or(0)
    }

    pub fn observe_latency(&self, elapsed: Duration) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.hist_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.hist_count.fetch_add(1, Ordering::Relaxed);
        if let Some(idx) = LATENCY_BUCKETS_MS.iter().position(|ub| ms <= *ub) {
            self.hist_counts[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn render(&self) -> String {
        let mut buf = String::new();
        counter(
            &mut buf,
            "nurse_advice_requests_total",
            "Advice requests received",
            self.requests_total.load(Ordering::Relaxed),
        );
        counter(
            &mut buf,
            "nurse_advice_succeeded_total",
            "Advice requests answered with generated advice",
            self.succeeded_total.load(Ordering::Relaxed),
        );

        writeln!(
            &mut buf,
            "# HELP nurse_advice_fallbacks_total Advice requests answered with the fallback payload\n# TYPE nurse_advice_fallbacks_total counter"
        )
        .ok();
        for (cause, count) in FALLBACK_CAUSES.iter().zip(self.fallbacks.iter()) {
            writeln!(
                &mut buf,
                "nurse_advice_fallbacks_total{{cause=\"{}\"}} {}",
                cause,
                count.load(Ordering::Relaxed)
            )
            .ok();
        }

        writeln!(
            &mut buf,
            "# HELP nurse_advice_rejections_total Advice requests ended before generation, by status\n# TYPE nurse_advice_rejections_total counter"
        )
        .ok();
        let mut rejections: Vec<(u16, u64)> =
            self.rejections.iter().map(|e| (*e.key(), *e.value())).collect();
        rejections.sort_unstable();
        for (status, count) in rejections {
            writeln!(
                &mut buf,
                "nurse_advice_rejections_total{{status=\"{}\"}} {}",
                status, count
            )
            .ok();
        }

        writeln!(
            &mut buf,
            "# HELP nurse_advice_site_clicks_total Clicks on recommended recruitment sites\n# TYPE nurse_advice_site_clicks_total counter"
        )
        .ok();
        let mut clicks: Vec<(&str, u64)> =
            self.site_clicks.iter().map(|e| (*e.key(), *e.value())).collect();
        clicks.sort_unstable();
        for (site, count) in clicks {
            writeln!(
                &mut buf,
                "nurse_advice_site_clicks_total{{site=\"{}\"}} {}",
                site, count
            )
            .ok();
        }

        writeln!(
            &mut buf,
            "# HELP nurse_advice_request_latency_ms Advice request latency histogram milliseconds\n# TYPE nurse_advice_request_latency_ms histogram"
        )
        .ok();
        let mut cumulative = 0;
        for (ub, c) in LATENCY_BUCKETS_MS.iter().zip(self.hist_counts.iter()) {
            cumulative += c.load(Ordering::Relaxed);
            writeln!(
                &mut buf,
                "nurse_advice_request_latency_ms_bucket{{le=\"{}\"}} {}",
                ub, cumulative
            )
            .ok();
        }
        let count = self.hist_count.load(Ordering::Relaxed);
        writeln!(
            &mut buf,
            "nurse_advice_request_latency_ms_bucket{{le=\"+Inf\"}} {}",
            count
        )
        .ok();
        writeln!(
            &mut buf,
            "nurse_advice_request_latency_ms_sum {}",
            self.hist_sum_ms.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(&mut buf, "nurse_advice_request_latency_ms_count {}", count).ok();

        writeln!(
            &mut buf,
            "# HELP nurse_advice_build_info Build information\n# TYPE nurse_advice_build_info gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "nurse_advice_build_info{{version=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION")
        )
        .ok();
        writeln!(
            &mut buf,
            "# HELP nurse_advice_process_start_time_seconds Process start time (Unix epoch seconds)\n# TYPE nurse_advice_process_start_time_seconds gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "nurse_advice_process_start_time_seconds {}",
            self.start_epoch
        )
        .ok();
        writeln!(
            &mut buf,
            "# HELP nurse_advice_process_uptime_seconds Process uptime seconds\n# TYPE nurse_advice_process_uptime_seconds gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "nurse_advice_process_uptime_seconds {}",
            self.start_instant.elapsed().as_secs_f64()
        )
        .ok();
        buf
    }
}

fn counter(buf: &mut String, name: &str, help: &str, value: u64) {
    writeln!(buf, "# HELP {} {}", name, help).ok();
    writeln!(buf, "# TYPE {} counter", name).ok();
    writeln!(buf, "{} {}", name, value).ok();
}
