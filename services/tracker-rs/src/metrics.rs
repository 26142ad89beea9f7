use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry};

pub const OUTCOME_DELIVERED: &str = "delivered";
pub const OUTCOME_SKIPPED: &str = "skipped";
pub const OUTCOME_CONNECT_FAILED: &str = "connect_failed";
pub const OUTCOME_SEND_FAILED: &str = "send_failed";

pub struct AppMetrics {
    pub events_accepted_total: IntCounter,
    pub deliveries_total: IntCounterVec,
    pub producer_invalidations_total: IntCounter,
    pub http_requests_total: IntCounterVec,
}

impl AppMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let accepted = IntCounter::with_opts(Opts::new(
            "tracker_events_accepted_total",
            "Tracking beacons accepted",
        ))?;
        let deliveries = IntCounterVec::new(
            Opts::new(
                "tracker_deliveries_total",
                "Broker delivery attempts by outcome",
            ),
            &["outcome"],
        )?;
        let invalidations = IntCounter::with_opts(Opts::new(
            "tracker_producer_invalidations_total",
            "Cached producers discarded after a send failure",
        ))?;
        let http_reqs = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by handler and status"),
            &["handler", "method", "status_code"],
        )?;

        registry.register(Box::new(accepted.clone()))?;
        registry.register(Box::new(deliveries.clone()))?;
        registry.register(Box::new(invalidations.clone()))?;
        registry.register(Box::new(http_reqs.clone()))?;

        Ok(Self {
            events_accepted_total: accepted,
            deliveries_total: deliveries,
            producer_invalidations_total: invalidations,
            http_requests_total: http_reqs,
        })
    }

    pub fn delivery(&self, outcome: &str) {
        self.deliveries_total.with_label_values(&[outcome]).inc();
    }

    pub fn http(&self, handler: &str, method: &str, status: u16) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[handler, method, status.as_str()])
            .inc();
    }
}

pub fn gather(registry: &Registry) -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&registry.gather(), &mut buf)?;
    Ok(String::from_utf8(buf)?)
}
