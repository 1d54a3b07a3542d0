//! Retry-across-endpoints decorator with a circuit breaker.
//!
//! Every attempt gets `slow_call_duration` to finish; a slower attempt is
//! cancelled and counted as a failure. Unexpected errors and slow calls are
//! retried (the wrapped invoker picks the next endpoint on each call) up to
//! `max_retries` times. Intentional interruptions are returned at once.
//! Between attempts the response goes back to what it was before the first
//! one. When the last attempt was too slow the request fails with a 504
//! `FAILOVER_SLOW_CALL`.
//!
//! Consecutive failures feed a circuit breaker. Once `max_failures` is
//! reached the circuit stays open for `open_state_duration` and requests fail
//! fast with a 502. After that a trial request is let through: success
//! closes the circuit, failure opens it again.
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use http::StatusCode;
use tokio::time::Instant;

use crate::{
    config::FailoverConfig,
    core::{
        context::RequestContext,
        error::{ExecutionError, ExecutionFailure, StageResult},
        invoker::Invoker,
    },
    metrics,
};

pub const FAILOVER_CIRCUIT_OPEN_KEY: &str = "FAILOVER_CIRCUIT_OPEN";
pub const FAILOVER_SLOW_CALL_KEY: &str = "FAILOVER_SLOW_CALL";

/// Public attribute holding the subscription resolved by the security chain.
pub const ATTR_SUBSCRIPTION_ID: &str = "axon.attribute.subscription.id";

/// Consecutive-failure circuit breaker built on atomics.
#[derive(Debug)]
pub struct CircuitBreaker {
    max_failures: u32,
    open_for: Duration,
    origin: Instant,
    failures: AtomicU32,
    /// Millis since `origin` until which the circuit is open; 0 when closed.
    open_until: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, open_for: Duration) -> Self {
        Self {
            max_failures: max_failures.max(1),
            open_for,
            origin: Instant::now(),
            failures: AtomicU32::new(0),
            open_until: AtomicU64::new(0),
        }
    }

    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn state(&self) -> CircuitState {
        match self.open_until.load(Ordering::Acquire) {
            0 => CircuitState::Closed,
            until if self.now_millis() < until => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    /// Whether a call may go through right now.
    pub fn allows(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        self.open_until.store(0, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let half_open = self.state() == CircuitState::HalfOpen;
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if half_open || failures >= self.max_failures {
            let open_for = u64::try_from(self.open_for.as_millis()).unwrap_or(u64::MAX);
            let until = self.now_millis().saturating_add(open_for).max(1);
            self.open_until.store(until, Ordering::Release);
            self.failures.store(0, Ordering::Release);
            tracing::warn!(
                "Failover circuit opened for {:?} after {} consecutive failures",
                self.open_for,
                failures
            );
        }
    }
}

/// Wraps the API's invoker when failover is enabled.
pub struct FailoverInvoker {
    inner: Arc<dyn Invoker>,
    config: FailoverConfig,
    api_id: String,
    breakers: ArcSwap<HashMap<String, Arc<CircuitBreaker>>>,
}

impl FailoverInvoker {
    pub fn new(inner: Arc<dyn Invoker>, config: FailoverConfig, api_id: impl Into<String>) -> Self {
        Self {
            inner,
            config,
            api_id: api_id.into(),
            breakers: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Breaker for the request's subscription, or the API-wide one.
    pub fn breaker_for(&self, ctx: &RequestContext) -> Arc<CircuitBreaker> {
        let key = if self.config.per_subscription {
            ctx.attribute(ATTR_SUBSCRIPTION_ID)
                .and_then(|value| value.as_str())
                .unwrap_or(&self.api_id)
                .to_string()
        } else {
            self.api_id.clone()
        };

        if let Some(breaker) = self.breakers.load().get(&key) {
            return breaker.clone();
        }

        let created = Arc::new(CircuitBreaker::new(
            self.config.max_failures,
            self.config.open_state_duration(),
        ));
        let mut result = created.clone();
        self.breakers.rcu(|current| {
            let mut next = HashMap::clone(current);
            result = next.entry(key.clone()).or_insert_with(|| created.clone()).clone();
            next
        });
        result
    }

    async fn attempt(&self, ctx: &mut RequestContext) -> StageResult {
        let slow_call = self.config.slow_call_duration();
        match tokio::time::timeout(slow_call, self.inner.invoke(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout(slow_call)),
        }
    }
}

#[async_trait]
impl Invoker for FailoverInvoker {
    fn id(&self) -> &str {
        "failover-invoker"
    }

    async fn invoke(&self, ctx: &mut RequestContext) -> StageResult {
        let breaker = self.breaker_for(ctx);
        if !breaker.allows() {
            return Err(ctx.interrupt_with(
                ExecutionFailure::new(StatusCode::BAD_GATEWAY)
                    .key(FAILOVER_CIRCUIT_OPEN_KEY)
                    .message("Circuit breaker is open"),
            ));
        }

        let snapshot = ctx.response.clone();
        let mut attempt = 0;
        loop {
            let error = match self.attempt(ctx).await {
                Ok(()) => {
                    breaker.record_success();
                    return Ok(());
                }
                Err(error) if error.is_interruption() => return Err(error),
                Err(error) => error,
            };

            breaker.record_failure();
            if attempt >= self.config.max_retries || !breaker.allows() {
                tracing::warn!(
                    "Failover exhausted for API {} after {} attempts: {}",
                    self.api_id,
                    attempt + 1,
                    error
                );
                return Err(match error {
                    ExecutionError::Timeout(_) => ctx.interrupt_with(
                        ExecutionFailure::new(StatusCode::GATEWAY_TIMEOUT)
                            .key(FAILOVER_SLOW_CALL_KEY)
                            .message("Endpoint did not answer in time"),
                    ),
                    error => error,
                });
            }

            attempt += 1;
            metrics::increment_failover_retries(&self.api_id);
            tracing::debug!(
                "Retrying invocation of API {} (attempt {}): {}",
                self.api_id,
                attempt + 1,
                error
            );
            // Discard whatever the failed attempt wrote.
            ctx.response = snapshot.clone();
        }
    }
}
