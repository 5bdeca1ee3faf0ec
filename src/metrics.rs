/// Metrics collection for the gateway
use anyhow::Result;
use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use serde::Serialize;
use std::time::Duration;

/// Process-wide gateway counters.
///
/// Counters are monotonically non-decreasing and reset only on restart.
/// Hits and misses are recorded only for GET requests that resolved to a
/// backend, so `total_requests >= cache_hits + cache_misses` always holds.
pub struct GatewayMetrics {
    /// Prometheus registry
    registry: Registry,
    /// Total number of requests entering the dispatch pipeline
    requests_total: IntCounter,
    /// Cache hits on GET requests
    cache_hits_total: IntCounter,
    /// Cache misses (including expired entries) on GET requests
    cache_misses_total: IntCounter,
    /// Upstream connection failures
    upstream_errors_total: IntCounter,
    /// Request duration histogram
    request_duration: Histogram,
}

impl GatewayMetrics {
    /// Create a new metrics registry with all counters registered
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounter::with_opts(Opts::new(
            "gateway_requests_total",
            "Total number of HTTP requests processed by the gateway",
        ))?;
        registry.register(Box::new(requests_total.clone()))?;

        let cache_hits_total = IntCounter::with_opts(Opts::new(
            "gateway_cache_hits_total",
            "Total number of GET requests served from the response cache",
        ))?;
        registry.register(Box::new(cache_hits_total.clone()))?;

        let cache_misses_total = IntCounter::with_opts(Opts::new(
            "gateway_cache_misses_total",
            "Total number of GET requests that missed the response cache",
        ))?;
        registry.register(Box::new(cache_misses_total.clone()))?;

        let upstream_errors_total = IntCounter::with_opts(Opts::new(
            "gateway_upstream_errors_total",
            "Total number of upstream connection errors",
        ))?;
        registry.register(Box::new(upstream_errors_total.clone()))?;

        let request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "gateway_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            cache_hits_total,
            cache_misses_total,
            upstream_errors_total,
            request_duration,
        })
    }

    /// Record a request entering the dispatch pipeline
    pub fn record_request(&self) {
        self.requests_total.inc();
    }

    /// Record a cache hit
    pub fn record_cache_hit(&self) {
        self.cache_hits_total.inc();
    }

    /// Record a cache miss
    pub fn record_cache_miss(&self) {
        self.cache_misses_total.inc();
    }

    /// Record an upstream connection error
    pub fn record_upstream_error(&self) {
        self.upstream_errors_total.inc();
    }

    /// Record a completed response
    pub fn record_response(&self, duration: Duration) {
        self.request_duration.observe(duration.as_secs_f64());
    }

    /// Get the metrics registry for Prometheus exposition
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get a snapshot of the reporting counters.
    ///
    /// Each counter is read atomically; the snapshot is not transactionally
    /// atomic across all three.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.requests_total.get(),
            cache_hits: self.cache_hits_total.get(),
            cache_misses: self.cache_misses_total.get(),
        }
    }

    /// Export all registered metrics in Prometheus text format
    pub fn export(&self) -> Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Snapshot of the counters exposed on the /metrics endpoint
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Total requests processed
    pub total_requests: u64,
    /// Requests served from the cache
    pub cache_hits: u64,
    /// Requests that missed the cache
    pub cache_misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = GatewayMetrics::new().unwrap();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.cache_hits, 0);
        assert_eq!(snapshot.cache_misses, 0);
    }

    #[test]
    fn test_increments() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.record_request();
        metrics.record_request();
        metrics.record_cache_hit();
        metrics.record_cache_miss();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
        assert!(snapshot.total_requests >= snapshot.cache_hits + snapshot.cache_misses);
    }

    #[test]
    fn test_concurrent_increments_are_never_lost() {
        use std::sync::Arc;

        let metrics = Arc::new(GatewayMetrics::new().unwrap());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let metrics = metrics.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    metrics.record_request();
                    metrics.record_cache_hit();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 8000);
        assert_eq!(snapshot.cache_hits, 8000);
    }

    #[test]
    fn test_snapshot_serializes_to_expected_keys() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.record_request();

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["total_requests"], 1);
        assert_eq!(json["cache_hits"], 0);
        assert_eq!(json["cache_misses"], 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.record_request();
        metrics.record_response(Duration::from_millis(5));

        let output = metrics.export().unwrap();
        assert!(output.contains("gateway_requests_total 1"));
        assert!(output.contains("gateway_request_duration_seconds"));
    }
}
