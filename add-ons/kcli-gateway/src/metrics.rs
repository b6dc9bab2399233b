//! Prometheus registry for the gateway.

use prometheus::{
    histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct GatewayMetrics {
    pub registry: Registry,
    pub requests_total: IntCounterVec,
    pub request_duration: HistogramVec,
    pub in_flight: IntGauge,
    pub topology_build_duration: HistogramVec,
    pub watch_lag: IntGauge,
    pub cache_hits: IntGauge,
    pub cache_misses: IntGauge,
    pub breaker_state: IntGaugeVec,
    pub subscribers: IntGauge,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let requests_total = IntCounterVec::new(
            opts!("kcli_gateway_requests_total", "Requests by route and status"),
            &["route", "status"],
        )
        .expect("metric definition");
        let request_duration = HistogramVec::new(
            histogram_opts!(
                "kcli_gateway_request_duration_seconds",
                "Request latency by route"
            ),
            &["route"],
        )
        .expect("metric definition");
        let in_flight = IntGauge::new("kcli_gateway_in_flight_requests", "Outstanding requests")
            .expect("metric definition");
        let topology_build_duration = HistogramVec::new(
            histogram_opts!(
                "kcli_gateway_topology_build_seconds",
                "Topology build duration"
            ),
            &["cluster"],
        )
        .expect("metric definition");
        let watch_lag = IntGauge::new(
            "kcli_gateway_watch_lag_frames",
            "Frames dropped across subscriber queues",
        )
        .expect("metric definition");
        let cache_hits =
            IntGauge::new("kcli_gateway_cache_hits", "Response cache hits").expect("metric definition");
        let cache_misses = IntGauge::new("kcli_gateway_cache_misses", "Response cache misses")
            .expect("metric definition");
        let breaker_state = IntGaugeVec::new(
            opts!(
                "kcli_gateway_breaker_state",
                "Circuit breaker state per cluster (0 closed, 1 half-open, 2 open)"
            ),
            &["cluster"],
        )
        .expect("metric definition");
        let subscribers = IntGauge::new(
            "kcli_gateway_stream_subscribers",
            "Live stream subscriber sessions",
        )
        .expect("metric definition");

        for metric in [
            Box::new(requests_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(request_duration.clone()),
            Box::new(in_flight.clone()),
            Box::new(topology_build_duration.clone()),
            Box::new(watch_lag.clone()),
            Box::new(cache_hits.clone()),
            Box::new(cache_misses.clone()),
            Box::new(breaker_state.clone()),
            Box::new(subscribers.clone()),
        ] {
            registry.register(metric).expect("metric registration");
        }

        Self {
            registry,
            requests_total,
            request_duration,
            in_flight,
            topology_build_duration,
            watch_lag,
            cache_hits,
            cache_misses,
            breaker_state,
            subscribers,
        }
    }

    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_encode() {
        let metrics = GatewayMetrics::new();
        metrics
            .requests_total
            .with_label_values(&["/api/v1/version", "200"])
            .inc();
        metrics.in_flight.set(2);
        let text = metrics.encode();
        assert!(text.contains("kcli_gateway_requests_total"));
        assert!(text.contains("kcli_gateway_in_flight_requests 2"));
    }
}
