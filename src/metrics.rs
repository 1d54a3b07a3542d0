//! Reactor metrics on top of the `metrics` facade.
//!
//! No exporter is embedded here; the host process installs whatever recorder
//! it prefers. This module only names and describes the reactor's metric
//! families and offers small helpers plus an RAII timer.
//!
//! Provided metrics (labels vary by family):
//! * `axon_reactor_requests_total` (counter; api, status)
//! * `axon_reactor_request_duration_seconds` (histogram; api)
//! * `axon_reactor_endpoint_response_seconds` (histogram; api)
//! * `axon_reactor_pending_requests` (gauge; api)
//! * `axon_reactor_request_timeouts_total` (counter; api)
//! * `axon_reactor_failover_retries_total` (counter; api)
use std::{collections::HashMap, sync::Mutex, time::Duration};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;
use tokio::time::Instant;

pub const REQUESTS_TOTAL: &str = "axon_reactor_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "axon_reactor_request_duration_seconds";
pub const ENDPOINT_RESPONSE_SECONDS: &str = "axon_reactor_endpoint_response_seconds";
pub const PENDING_REQUESTS: &str = "axon_reactor_pending_requests";
pub const REQUEST_TIMEOUTS_TOTAL: &str = "axon_reactor_request_timeouts_total";
pub const FAILOVER_RETRIES_TOTAL: &str = "axon_reactor_failover_retries_total";

/// Last pending-request value published per API, kept for ad-hoc snapshots.
pub static PENDING_GAUGES: Lazy<Mutex<HashMap<String, f64>>> = Lazy::new(|| {
    describe_counter!(
        REQUESTS_TOTAL,
        Unit::Count,
        "Total number of requests completed by reactors."
    );
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "End to end latency of requests handled by reactors."
    );
    describe_histogram!(
        ENDPOINT_RESPONSE_SECONDS,
        Unit::Seconds,
        "Time spent waiting on the backend endpoint."
    );
    describe_gauge!(
        PENDING_REQUESTS,
        "Number of in-flight requests per reactor."
    );
    describe_counter!(
        REQUEST_TIMEOUTS_TOTAL,
        Unit::Count,
        "Requests interrupted by the request timeout."
    );
    describe_counter!(
        FAILOVER_RETRIES_TOTAL,
        Unit::Count,
        "Backend invocations retried by the failover invoker."
    );

    Mutex::new(HashMap::new())
});

/// Publish the pending request count of one reactor.
pub fn set_pending_requests(api_id: &str, count: usize) {
    if let Ok(mut gauges) = PENDING_GAUGES.lock() {
        gauges.insert(api_id.to_string(), count as f64);
    } else {
        tracing::error!("Failed to acquire lock for pending request gauges");
        return;
    }

    gauge!(PENDING_REQUESTS, "api" => api_id.to_string()).set(count as f64);
}

/// Count a completed request.
pub fn increment_request_total(api_id: &str, status: u16) {
    counter!(
        REQUESTS_TOTAL,
        "api" => api_id.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_endpoint_response_time(api_id: &str, duration: Duration) {
    histogram!(ENDPOINT_RESPONSE_SECONDS, "api" => api_id.to_string())
        .record(duration.as_secs_f64());
}

pub fn increment_request_timeouts(api_id: &str) {
    counter!(REQUEST_TIMEOUTS_TOTAL, "api" => api_id.to_string()).increment(1);
}

pub fn increment_failover_retries(api_id: &str) {
    counter!(FAILOVER_RETRIES_TOTAL, "api" => api_id.to_string()).increment(1);
}

/// RAII helper measuring the full pipeline duration of one request.
pub struct RequestTimer {
    start: Instant,
    api_id: String,
}

impl RequestTimer {
    pub fn new(api_id: &str) -> Self {
        Self {
            start: Instant::now(),
            api_id: api_id.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        histogram!(REQUEST_DURATION_SECONDS, "api" => self.api_id.clone())
            .record(self.start.elapsed().as_secs_f64());
    }
}

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    tracing::info!("Initializing reactor metrics");
    Lazy::force(&PENDING_GAUGES);
    Ok(())
}

/// Snapshot of the pending-request gauges.
pub fn get_current_metrics() -> HashMap<String, f64> {
    let mut metrics = HashMap::new();

    if let Ok(gauges) = PENDING_GAUGES.lock() {
        for (api, pending) in gauges.iter() {
            metrics.insert(format!("pending_requests_{api}"), *pending);
        }
    }

    metrics
}
