use async_trait::async_trait;
use eyre::Result;

/// One open trace span.
pub trait TraceSpan: Send + Sync {
    fn record_error(&mut self, error: &str);

    /// Close the span. Called at most once.
    fn end(&mut self);
}

/// Tracing backend used for phase and component spans.
#[async_trait]
pub trait Tracer: Send + Sync + 'static {
    fn enabled(&self) -> bool;

    fn start_span(&self, name: &str, request_id: &str) -> Box<dyn TraceSpan>;

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Tracer used when tracing is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

struct NoopSpan;

impl TraceSpan for NoopSpan {
    fn record_error(&mut self, _error: &str) {}
    fn end(&mut self) {}
}

impl Tracer for NoopTracer {
    fn enabled(&self) -> bool {
        false
    }

    fn start_span(&self, _name: &str, _request_id: &str) -> Box<dyn TraceSpan> {
        Box::new(NoopSpan)
    }
}
