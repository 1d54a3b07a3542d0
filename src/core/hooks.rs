//! Observation hooks around hooked pipeline components (processor chains,
//! the security chain, invokers).
//!
//! Hooks observe; they never change the outcome of the component they wrap.
use std::{borrow::Cow, sync::Arc};

use futures_util::future::BoxFuture;
use http::header;

use crate::{
    config::LoggingMode,
    core::{
        context::{ActiveSpan, AnalyticsContext, RequestContext},
        error::{ExecutionError, StageResult},
    },
    ports::ExecutionPhase,
};

pub trait Hook: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn pre(&self, _component: &str, _ctx: &mut RequestContext, _phase: Option<ExecutionPhase>) {}

    fn post(&self, _component: &str, _ctx: &mut RequestContext, _phase: Option<ExecutionPhase>) {}

    /// Called for interruptions as well as real errors.
    fn on_error(
        &self,
        _component: &str,
        _ctx: &mut RequestContext,
        _phase: Option<ExecutionPhase>,
        _error: &ExecutionError,
    ) {
    }
}

/// Run `body` surrounded by `hooks`. The body's result is returned unchanged.
pub async fn hooked<F>(
    hooks: &[Arc<dyn Hook>],
    component: &str,
    ctx: &mut RequestContext,
    phase: Option<ExecutionPhase>,
    body: F,
) -> StageResult
where
    F: for<'c> FnOnce(&'c mut RequestContext) -> BoxFuture<'c, StageResult> + Send,
{
    if hooks.is_empty() {
        return body(ctx).await;
    }

    for hook in hooks {
        hook.pre(component, ctx, phase);
    }
    let result = body(&mut *ctx).await;
    match &result {
        Ok(()) => {
            for hook in hooks {
                hook.post(component, ctx, phase);
            }
        }
        Err(error) => {
            for hook in hooks {
                hook.on_error(component, ctx, phase, error);
            }
        }
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TracingMode {
    Spans,
    Verbose,
}

/// Opens a tracer span per hooked component, or in verbose mode emits
/// detailed `tracing` events about each component execution.
pub struct TracingHook {
    id: String,
    mode: TracingMode,
}

impl TracingHook {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mode: TracingMode::Spans,
        }
    }

    pub fn verbose(id: impl Into<String>) -> Self {
        Self {
            id: format!("{}-verbose", id.into()),
            mode: TracingMode::Verbose,
        }
    }

    fn span_key(&self, component: &str, phase: Option<ExecutionPhase>) -> String {
        match phase {
            Some(phase) => format!("{}:{}:{}", self.id, component, phase),
            None => format!("{}:{}", self.id, component),
        }
    }
}

impl Hook for TracingHook {
    fn id(&self) -> &str {
        &self.id
    }

    fn pre(&self, component: &str, ctx: &mut RequestContext, phase: Option<ExecutionPhase>) {
        match self.mode {
            TracingMode::Spans => {
                if let Some(span) = ctx.start_span(component) {
                    ctx.internal
                        .hook_spans
                        .insert(self.span_key(component, phase), span);
                }
            }
            TracingMode::Verbose => {
                tracing::debug!(
                    request_id = %ctx.request.id,
                    component = component,
                    phase = ?phase,
                    attributes = ctx.attributes.len(),
                    "Entering component"
                );
            }
        }
    }

    fn post(&self, component: &str, ctx: &mut RequestContext, phase: Option<ExecutionPhase>) {
        match self.mode {
            TracingMode::Spans => {
                if let Some(span) = ctx
                    .internal
                    .hook_spans
                    .remove(&self.span_key(component, phase))
                {
                    span.end();
                }
            }
            TracingMode::Verbose => {
                tracing::debug!(
                    request_id = %ctx.request.id,
                    component = component,
                    phase = ?phase,
                    status = ctx.response.status.as_u16(),
                    "Component completed"
                );
            }
        }
    }

    fn on_error(
        &self,
        component: &str,
        ctx: &mut RequestContext,
        phase: Option<ExecutionPhase>,
        error: &ExecutionError,
    ) {
        match self.mode {
            TracingMode::Spans => {
                let span: Option<ActiveSpan> = ctx
                    .internal
                    .hook_spans
                    .remove(&self.span_key(component, phase));
                if let Some(span) = span {
                    if error.is_interruption() && error.failure().is_none() {
                        span.end();
                    } else {
                        span.end_with_error(&error.to_string());
                    }
                }
            }
            TracingMode::Verbose => {
                tracing::debug!(
                    request_id = %ctx.request.id,
                    component = component,
                    phase = ?phase,
                    error = %error,
                    "Component ended with error"
                );
            }
        }
    }
}

/// Logs the proxied request and the backend response around an invoker.
#[derive(Debug, Default)]
pub struct LoggingHook;

impl LoggingHook {
    fn enabled_for(ctx: &RequestContext) -> Option<Arc<AnalyticsContext>> {
        ctx.internal.analytics.clone().filter(|analytics| {
            analytics.is_logging_enabled()
                && matches!(
                    analytics.logging_mode,
                    LoggingMode::Endpoint | LoggingMode::EntrypointAndEndpoint
                )
        })
    }

    fn excluded(analytics: &AnalyticsContext, content_type: Option<&str>) -> bool {
        let Some(content_type) = content_type else {
            return false;
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_ascii_lowercase();
        analytics
            .logging_excluded_response_types
            .iter()
            .any(|excluded| *excluded == mime)
    }
}

/// Lossy UTF-8 rendering of a payload, cut to `max_size` bytes.
pub fn truncate_payload(body: &[u8], max_size: Option<usize>) -> Cow<'_, str> {
    match max_size {
        Some(max) if body.len() > max => {
            let mut text = String::from_utf8_lossy(&body[..max]).into_owned();
            text.push_str("...");
            Cow::Owned(text)
        }
        _ => String::from_utf8_lossy(body),
    }
}

impl Hook for LoggingHook {
    fn id(&self) -> &str {
        "logging"
    }

    fn pre(&self, component: &str, ctx: &mut RequestContext, _phase: Option<ExecutionPhase>) {
        let Some(analytics) = Self::enabled_for(ctx) else {
            return;
        };
        tracing::info!(
            request_id = %ctx.request.id,
            component = component,
            method = %ctx.request.method,
            path = %ctx.request.path,
            headers = ctx.request.headers.len(),
            body = %truncate_payload(&ctx.request.body, analytics.logging_max_size),
            "Endpoint request"
        );
    }

    fn post(&self, component: &str, ctx: &mut RequestContext, _phase: Option<ExecutionPhase>) {
        let Some(analytics) = Self::enabled_for(ctx) else {
            return;
        };
        let content_type = ctx
            .response
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        let body = if Self::excluded(&analytics, content_type) {
            Cow::Borrowed("<excluded>")
        } else {
            truncate_payload(&ctx.response.body, analytics.logging_max_size)
        };
        tracing::info!(
            request_id = %ctx.request.id,
            component = component,
            status = ctx.response.status.as_u16(),
            body = %body,
            "Endpoint response"
        );
    }

    fn on_error(
        &self,
        component: &str,
        ctx: &mut RequestContext,
        _phase: Option<ExecutionPhase>,
        error: &ExecutionError,
    ) {
        if Self::enabled_for(ctx).is_some() {
            tracing::info!(
                request_id = %ctx.request.id,
                component = component,
                error = %error,
                "Endpoint invocation failed"
            );
        }
    }
}
