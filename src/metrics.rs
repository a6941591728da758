//! Process-wide request and conversion metrics in Prometheus text format.
//!
//! Values are atomics. Labelled families keep their series in a
//! `parking_lot::RwLock<BTreeMap<..>>`: the hot path takes the read lock and
//! bumps an existing atomic, and the write lock is only taken the first time
//! a label combination is seen. `BTreeMap` keeps the exposition order stable.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Latency buckets for HTTP requests, in seconds.
const HTTP_BUCKETS: [f64; 11] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Conversions are much slower than plain requests.
const CONVERSION_BUCKETS: [f64; 10] = [0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Fixed-bucket histogram. Bucket counts are stored per bucket and made
/// cumulative only when rendered.
#[derive(Debug)]
pub struct Histogram {
    bounds: &'static [f64],
    /// One slot per bound plus the `+Inf` overflow slot.
    counts: Vec<AtomicU64>,
    sum_micros: AtomicU64,
}

impl Histogram {
    fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            counts: (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: Duration) {
        let secs = value.as_secs_f64();
        let idx = self
            .bounds
            .iter()
            .position(|b| secs <= *b)
            .unwrap_or(self.bounds.len());
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(value.as_micros()).unwrap_or(u64::MAX);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn sum_secs(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    fn render(&self, out: &mut String, name: &str, labels: &[(&str, &str)]) {
        let mut cumulative = 0u64;
        for (i, count) in self.counts.iter().enumerate() {
            cumulative += count.load(Ordering::Relaxed);
            let le = match self.bounds.get(i) {
                Some(b) => b.to_string(),
                None => "+Inf".to_string(),
            };
            let mut with_le = labels.to_vec();
            with_le.push(("le", le.as_str()));
            let _ = writeln!(out, "{name}_bucket{} {cumulative}", label_set(&with_le));
        }
        let set = label_set(labels);
        let _ = writeln!(out, "{name}_sum{set} {}", self.sum_secs());
        let _ = writeln!(out, "{name}_count{set} {cumulative}");
    }
}

type RequestKey = (String, String, u16);
type ConversionKey = (String, String);

/// The service's metric registry. Shared behind an `Arc`.
#[derive(Debug)]
pub struct Metrics {
    namespace: String,
    http_requests: RwLock<BTreeMap<RequestKey, AtomicU64>>,
    http_duration: RwLock<BTreeMap<String, Histogram>>,
    conversions: RwLock<BTreeMap<ConversionKey, AtomicU64>>,
    conversion_duration: Histogram,
    active_conversions: AtomicI64,
    converter_ready: AtomicI64,
}

impl Metrics {
    /// `service_name` becomes the metric-name prefix after sanitising.
    pub fn new(service_name: &str) -> Self {
        Self {
            namespace: sanitize_namespace(service_name),
            http_requests: RwLock::new(BTreeMap::new()),
            http_duration: RwLock::new(BTreeMap::new()),
            conversions: RwLock::new(BTreeMap::new()),
            conversion_duration: Histogram::new(&CONVERSION_BUCKETS),
            active_conversions: AtomicI64::new(0),
            converter_ready: AtomicI64::new(0),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Count one finished HTTP request and record its latency.
    pub fn record_request(&self, endpoint: &str, method: &str, status: u16, elapsed: Duration) {
        increment(
            &self.http_requests,
            (endpoint.to_string(), method.to_string(), status),
        );

        if let Some(h) = self.http_duration.read().get(endpoint) {
            h.observe(elapsed);
            return;
        }
        self.http_duration
            .write()
            .entry(endpoint.to_string())
            .or_insert_with(|| Histogram::new(&HTTP_BUCKETS))
            .observe(elapsed);
    }

    /// Count one finished conversion. `status` is `success` or an error kind.
    pub fn record_conversion(&self, format: &str, status: &str, elapsed: Duration) {
        increment(&self.conversions, (format.to_string(), status.to_string()));
        self.conversion_duration.observe(elapsed);
    }

    /// Mark a conversion as in flight until the guard is dropped.
    pub fn track_active(&self) -> ActiveConversion<'_> {
        self.active_conversions.fetch_add(1, Ordering::Relaxed);
        ActiveConversion { metrics: self }
    }

    pub fn set_converter_ready(&self, ready: bool) {
        self.converter_ready.store(i64::from(ready), Ordering::Relaxed);
    }

    pub fn active_conversions(&self) -> i64 {
        self.active_conversions.load(Ordering::Relaxed)
    }

    pub fn request_count(&self, endpoint: &str, method: &str, status: u16) -> u64 {
        self.http_requests
            .read()
            .get(&(endpoint.to_string(), method.to_string(), status))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn conversion_count(&self, format: &str, status: &str) -> u64 {
        self.conversions
            .read()
            .get(&(format.to_string(), status.to_string()))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn conversion_duration(&self) -> &Histogram {
        &self.conversion_duration
    }

    /// Prometheus text exposition (format version 0.0.4).
    pub fn render(&self) -> String {
        let ns = &self.namespace;
        let mut out = String::with_capacity(4096);

        let name = format!("{ns}_http_requests_total");
        header(&mut out, &name, "counter", "Total HTTP requests by endpoint, method and status.");
        for ((endpoint, method, status), count) in self.http_requests.read().iter() {
            let status = status.to_string();
            let labels = label_set(&[
                ("endpoint", endpoint.as_str()),
                ("method", method.as_str()),
                ("status", status.as_str()),
            ]);
            let _ = writeln!(out, "{name}{labels} {}", count.load(Ordering::Relaxed));
        }

        let name = format!("{ns}_http_request_duration_seconds");
        header(&mut out, &name, "histogram", "HTTP request latency in seconds.");
        for (endpoint, h) in self.http_duration.read().iter() {
            h.render(&mut out, &name, &[("endpoint", endpoint.as_str())]);
        }

        let name = format!("{ns}_conversions_total");
        header(&mut out, &name, "counter", "Document conversions by output format and outcome.");
        for ((format, status), count) in self.conversions.read().iter() {
            let labels = label_set(&[("format", format.as_str()), ("status", status.as_str())]);
            let _ = writeln!(out, "{name}{labels} {}", count.load(Ordering::Relaxed));
        }

        let name = format!("{ns}_conversion_duration_seconds");
        header(&mut out, &name, "histogram", "Document conversion time in seconds.");
        self.conversion_duration.render(&mut out, &name, &[]);

        let name = format!("{ns}_active_conversions");
        header(&mut out, &name, "gauge", "Conversions currently in progress.");
        let _ = writeln!(out, "{name} {}", self.active_conversions());

        let name = format!("{ns}_converter_ready");
        header(&mut out, &name, "gauge", "1 when the conversion engine is initialised.");
        let _ = writeln!(out, "{name} {}", self.converter_ready.load(Ordering::Relaxed));

        out
    }
}

/// Decrements the active-conversion gauge on drop.
#[derive(Debug)]
pub struct ActiveConversion<'a> {
    metrics: &'a Metrics,
}

impl Drop for ActiveConversion<'_> {
    fn drop(&mut self) {
        self.metrics.active_conversions.fetch_sub(1, Ordering::Relaxed);
    }
}

fn increment<K: Ord>(map: &RwLock<BTreeMap<K, AtomicU64>>, key: K) {
    if let Some(c) = map.read().get(&key) {
        c.fetch_add(1, Ordering::Relaxed);
        return;
    }
    map.write()
        .entry(key)
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

fn header(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn label_set(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let inner = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{inner}}}")
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Metric names allow `[a-zA-Z_:][a-zA-Z0-9_:]*`; colons are reserved for
/// recording rules so they are replaced too.
fn sanitize_namespace(name: &str) -> String {
    let mut ns: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if ns.is_empty() || ns.starts_with(|c: char| c.is_ascii_digit()) {
        ns.insert(0, '_');
    }
    ns
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn namespace_is_sanitised() {
        assert_eq!(sanitize_namespace("docconvert-api"), "docconvert_api");
        assert_eq!(sanitize_namespace("My Service.v2"), "my_service_v2");
        assert_eq!(sanitize_namespace("9lives"), "_9lives");
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let metrics = Arc::new(Metrics::new("svc"));
        std::thread::scope(|s| {
            for t in 0..8 {
                let m = Arc::clone(&metrics);
                s.spawn(move || {
                    // Half the threads race on a fresh label set.
                    let status = if t % 2 == 0 { 200 } else { 500 };
                    for _ in 0..1000 {
                        m.record_request("/convert", "POST", status, Duration::from_millis(3));
                        m.record_conversion("markdown", "success", Duration::from_millis(3));
                    }
                });
            }
        });
        assert_eq!(metrics.request_count("/convert", "POST", 200), 4000);
        assert_eq!(metrics.request_count("/convert", "POST", 500), 4000);
        assert_eq!(metrics.conversion_count("markdown", "success"), 8000);
        assert_eq!(metrics.conversion_duration().count(), 8000);
    }

    #[test]
    fn counters_only_grow() {
        let m = Metrics::new("svc");
        let mut last = 0;
        for _ in 0..5 {
            m.record_request("/health", "GET", 200, Duration::ZERO);
            let now = m.request_count("/health", "GET", 200);
            assert!(now > last);
            last = now;
        }
    }

    #[test]
    fn active_gauge_follows_guard() {
        let m = Metrics::new("svc");
        {
            let _a = m.track_active();
            let _b = m.track_active();
            assert_eq!(m.active_conversions(), 2);
        }
        assert_eq!(m.active_conversions(), 0);
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let m = Metrics::new("svc");
        m.record_conversion("json", "success", Duration::from_millis(50));
        m.record_conversion("json", "success", Duration::from_secs(2));
        m.record_conversion("json", "corrupt_document", Duration::from_secs(500));
        let text = m.render();
        assert!(text.contains("svc_conversion_duration_seconds_bucket{le=\"0.1\"} 1\n"), "{text}");
        assert!(text.contains("svc_conversion_duration_seconds_bucket{le=\"2.5\"} 2\n"), "{text}");
        assert!(text.contains("svc_conversion_duration_seconds_bucket{le=\"300\"} 2\n"), "{text}");
        assert!(text.contains("svc_conversion_duration_seconds_bucket{le=\"+Inf\"} 3\n"), "{text}");
        assert!(text.contains("svc_conversion_duration_seconds_count 3\n"), "{text}");
        assert!(text.contains("svc_conversions_total{format=\"json\",status=\"corrupt_document\"} 1\n"));
    }

    #[test]
    fn render_exposes_every_family() {
        let m = Metrics::new("docconvert-api");
        m.set_converter_ready(true);
        m.record_request("/health", "GET", 200, Duration::from_millis(1));
        let text = m.render();
        for family in [
            "docconvert_api_http_requests_total counter",
            "docconvert_api_http_request_duration_seconds histogram",
            "docconvert_api_conversions_total counter",
            "docconvert_api_conversion_duration_seconds histogram",
            "docconvert_api_active_conversions gauge",
            "docconvert_api_converter_ready gauge",
        ] {
            assert!(text.contains(&format!("# TYPE {family}")), "missing {family}");
        }
        assert!(text.contains(
            "docconvert_api_http_requests_total{endpoint=\"/health\",method=\"GET\",status=\"200\"} 1\n"
        ));
        assert!(text.contains("docconvert_api_converter_ready 1\n"));
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape_label("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }
}
