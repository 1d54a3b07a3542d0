//! [`Tracer`] backed by `tracing` spans.
use crate::{
    ports::{TraceSpan, Tracer},
    tracing_setup::{create_component_span, create_phase_span},
};

/// Emits phase spans (`request`, `response`) and component spans through
/// the installed `tracing` subscriber.
#[derive(Debug, Clone)]
pub struct TracingTracer {
    api_id: String,
}

impl TracingTracer {
    pub fn new(api_id: impl Into<String>) -> Self {
        Self {
            api_id: api_id.into(),
        }
    }
}

struct SubscriberSpan {
    span: Option<tracing::Span>,
    error_field: &'static str,
}

impl TraceSpan for SubscriberSpan {
    fn record_error(&mut self, error: &str) {
        if let Some(span) = &self.span {
            span.record(self.error_field, error);
        }
    }

    fn end(&mut self) {
        self.span.take();
    }
}

impl Tracer for TracingTracer {
    fn enabled(&self) -> bool {
        true
    }

    fn start_span(&self, name: &str, request_id: &str) -> Box<dyn TraceSpan> {
        let (span, error_field) = match name {
            "request" | "response" => (create_phase_span(&self.api_id, name, request_id), "error"),
            _ => (create_component_span(name, request_id), "outcome"),
        };
        Box::new(SubscriberSpan {
            span: Some(span),
            error_field,
        })
    }
}
