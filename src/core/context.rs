//! The request-scoped execution context every pipeline stage works on.
//!
//! A [`RequestContext`] is created when a connection is accepted, moved into
//! the reactor, mutated in place by each stage and handed back once the
//! pipeline has finished. Dropping it (for instance because the client went
//! away and the pipeline future was dropped) closes any phase span still open.
use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    config::{ApiType, LoggingMode},
    core::{
        error::{ExecutionError, ExecutionFailure},
        invoker::InvokerSlot,
    },
    ports::{EntrypointConnector, NoopTracer, ResponseTransport, TraceSpan, Tracer},
};

pub const ATTR_API: &str = "axon.attribute.api";
pub const ATTR_API_DEPLOYED_AT: &str = "axon.attribute.api.deployed-at";
pub const ATTR_ORGANIZATION: &str = "axon.attribute.organization";
pub const ATTR_ENVIRONMENT: &str = "axon.attribute.environment";
pub const ATTR_CONTEXT_PATH: &str = "axon.attribute.context-path";
pub const ATTR_REQUEST_ID: &str = "axon.attribute.request.id";

/// Inbound request as seen by the reactor once the connector has parsed it.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub id: String,
    pub method: Method,
    /// Host header, or SNI server name for raw TCP.
    pub host: Option<String>,
    pub path: String,
    /// Matched listener path; filled in by the router.
    pub context_path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Server tag of the gateway server that accepted the connection.
    pub server_id: Option<String>,
    pub received_at: DateTime<Utc>,
    /// Monotonic start time; request deadlines are computed from it.
    pub timestamp: Instant,
}

impl GatewayRequest {
    pub fn new(method: Method, host: Option<&str>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: Uuid::new_v4().to_string(),
            method,
            host: host.map(str::to_string),
            context_path: path.clone(),
            path,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            server_id: None,
            received_at: Utc::now(),
            timestamp: Instant::now(),
        }
    }

    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Path relative to the matched context path.
    pub fn path_info(&self) -> &str {
        let context = self.context_path.trim_end_matches('/');
        self.path.strip_prefix(context).unwrap_or(&self.path)
    }
}

/// Response under construction.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub reason: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    ended: bool,
}

impl Default for GatewayResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            reason: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            ended: false,
        }
    }
}

impl GatewayResponse {
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Replace status, headers and body with the JSON rendering of `failure`.
    pub fn render_failure(&mut self, failure: &ExecutionFailure) {
        let message = failure
            .message
            .clone()
            .or_else(|| failure.status.canonical_reason().map(str::to_string));
        let body = serde_json::json!({
            "message": message,
            "http_status_code": failure.status.as_u16(),
            "key": failure.key,
        });

        self.status = failure.status;
        self.reason = failure.status.canonical_reason().map(str::to_string);
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.body = Bytes::from(body.to_string());
        if let Ok(length) = HeaderValue::from_str(&self.body.len().to_string()) {
            self.headers.insert(header::CONTENT_LENGTH, length);
        }
    }
}

/// Endpoint response time. Stays `NotStarted` when the backend is never invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EndpointTiming {
    #[default]
    NotStarted,
    Started(Instant),
    Computed(Duration),
}

impl EndpointTiming {
    pub fn start(&mut self) {
        *self = Self::Started(Instant::now());
    }

    /// Freeze the elapsed time. Later calls keep the first value.
    pub fn finish(&mut self) {
        if let Self::Started(start) = *self {
            *self = Self::Computed(start.elapsed());
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Computed(duration) => Some(*duration),
            _ => None,
        }
    }
}

/// Request metrics reported once the pipeline completes.
#[derive(Debug, Clone, Default)]
pub struct RequestMetrics {
    pub api_id: String,
    pub api_name: String,
    pub api_type: Option<ApiType>,
    pub path_info: String,
    pub status: u16,
    pub endpoint_response_time: EndpointTiming,
    pub error_key: Option<String>,
    pub error_message: Option<String>,
}

/// Analytics settings resolved for one API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyticsContext {
    pub enabled: bool,
    pub logging_mode: LoggingMode,
    pub tracing_enabled: bool,
    pub tracing_verbose: bool,
    pub logging_max_size: Option<usize>,
    pub logging_excluded_response_types: Vec<String>,
}

impl AnalyticsContext {
    pub fn is_logging_enabled(&self) -> bool {
        self.enabled && self.logging_mode != LoggingMode::None
    }
}

/// A trace span that is closed exactly once: on [`end`](Self::end),
/// [`end_with_error`](Self::end_with_error) or drop.
pub struct ActiveSpan {
    inner: Option<Box<dyn TraceSpan>>,
}

impl ActiveSpan {
    pub fn new(span: Box<dyn TraceSpan>) -> Self {
        Self { inner: Some(span) }
    }

    pub fn end(mut self) {
        if let Some(mut span) = self.inner.take() {
            span.end();
        }
    }

    pub fn end_with_error(mut self, error: &str) {
        if let Some(mut span) = self.inner.take() {
            span.record_error(error);
            span.end();
        }
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        if let Some(mut span) = self.inner.take() {
            span.end();
        }
    }
}

impl std::fmt::Debug for ActiveSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSpan")
            .field("open", &self.inner.is_some())
            .finish()
    }
}

/// Gateway-only state, never visible to policies.
#[derive(Default)]
pub struct InternalAttributes {
    pub entrypoint_connector: Option<Arc<dyn EntrypointConnector>>,
    pub invoker: Option<InvokerSlot>,
    pub invoker_skip: bool,
    pub execution_failure: Option<ExecutionFailure>,
    pub validate_subscription: bool,
    pub analytics: Option<Arc<AnalyticsContext>>,
    pub request_phase_span: Option<ActiveSpan>,
    pub response_phase_span: Option<ActiveSpan>,
    /// Component spans opened by tracing hooks, keyed by hook and component.
    pub hook_spans: HashMap<String, ActiveSpan>,
    pub extras: HashMap<String, Value>,
}

impl InternalAttributes {
    /// Close whichever phase spans are still open.
    pub fn end_phase_spans(&mut self, error: Option<&str>) {
        for span in [
            self.request_phase_span.take(),
            self.response_phase_span.take(),
        ]
        .into_iter()
        .flatten()
        {
            match error {
                Some(error) => span.end_with_error(error),
                None => span.end(),
            }
        }
    }
}

pub struct RequestContext {
    pub request: GatewayRequest,
    pub response: GatewayResponse,
    /// Attributes visible to policies.
    pub attributes: HashMap<String, Value>,
    pub internal: InternalAttributes,
    pub metrics: RequestMetrics,
    pub tracer: Arc<dyn Tracer>,
    transport: Arc<dyn ResponseTransport>,
}

impl RequestContext {
    pub fn new(request: GatewayRequest, transport: Arc<dyn ResponseTransport>) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert(ATTR_REQUEST_ID.to_string(), Value::from(request.id.clone()));
        Self {
            request,
            response: GatewayResponse::default(),
            attributes,
            internal: InternalAttributes::default(),
            metrics: RequestMetrics::default(),
            tracer: Arc::new(NoopTracer),
            transport,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Record `failure` and produce the interruption that short-circuits the
    /// remaining stages.
    pub fn interrupt_with(&mut self, failure: ExecutionFailure) -> ExecutionError {
        self.metrics.error_key = failure.key.clone();
        self.metrics.error_message = failure.message.clone();
        self.internal.execution_failure = Some(failure.clone());
        ExecutionError::InterruptedWithFailure(failure)
    }

    /// Benign short-circuit: nothing to render.
    pub fn interrupt(&self) -> ExecutionError {
        ExecutionError::Interrupted
    }

    pub fn execution_failure(&self) -> Option<&ExecutionFailure> {
        self.internal.execution_failure.as_ref()
    }

    /// Start a phase span when the tracer is enabled.
    pub fn start_span(&self, name: &str) -> Option<ActiveSpan> {
        self.tracer
            .enabled()
            .then(|| ActiveSpan::new(self.tracer.start_span(name, &self.request.id)))
    }

    /// Hand the response to the transport. Renders the execution failure if
    /// one is recorded. Calling it again after success is a no-op.
    pub async fn end_response(&mut self) -> eyre::Result<()> {
        if self.response.ended {
            return Ok(());
        }
        if let Some(failure) = self.internal.execution_failure.clone() {
            self.response.render_failure(&failure);
        }
        self.metrics.status = self.response.status.as_u16();
        self.transport.send(&self.response).await?;
        self.response.ended = true;
        Ok(())
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("attributes", &self.attributes)
            .field("execution_failure", &self.internal.execution_failure)
            .finish_non_exhaustive()
    }
}
