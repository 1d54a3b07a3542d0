//! Backend invocation.
//!
//! The invoker a request uses is stored in [`InternalAttributes::invoker`]
//! as an [`InvokerSlot`]. Policies may replace it; legacy-shaped invokers
//! are adapted once per request by [`InvokerSlot::resolve`].
//!
//! [`InternalAttributes::invoker`]: crate::core::context::InternalAttributes::invoker
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::{
    core::{
        context::{GatewayRequest, RequestContext},
        error::{ExecutionFailure, StageResult},
    },
    ports::EndpointManager,
};

pub const NO_ENDPOINT_FOUND_KEY: &str = "NO_ENDPOINT_FOUND";

/// Forwards the request held by the context to a backend.
#[async_trait]
pub trait Invoker: Send + Sync + 'static {
    fn id(&self) -> &str;

    async fn invoke(&self, ctx: &mut RequestContext) -> StageResult;
}

/// Backend answer of a [`LegacyInvoker`].
#[derive(Debug, Clone)]
pub struct LegacyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Older invoker contract: reads the request and returns the backend answer
/// instead of working on the context.
#[async_trait]
pub trait LegacyInvoker: Send + Sync + 'static {
    fn id(&self) -> &str;

    async fn invoke(&self, request: &GatewayRequest) -> eyre::Result<LegacyResponse>;
}

/// The invoker shapes a context can hold.
#[derive(Clone)]
pub enum InvokerSlot {
    Current(Arc<dyn Invoker>),
    Legacy(Arc<dyn LegacyInvoker>),
}

impl InvokerSlot {
    /// The invoker to call, adapting the legacy shape.
    pub fn resolve(&self) -> Arc<dyn Invoker> {
        match self {
            Self::Current(invoker) => invoker.clone(),
            Self::Legacy(legacy) => Arc::new(InvokerAdapter::new(legacy.clone())),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Current(invoker) => invoker.id(),
            Self::Legacy(legacy) => legacy.id(),
        }
    }
}

impl std::fmt::Debug for InvokerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Current(invoker) => f.debug_tuple("Current").field(&invoker.id()).finish(),
            Self::Legacy(legacy) => f.debug_tuple("Legacy").field(&legacy.id()).finish(),
        }
    }
}

/// Exposes a [`LegacyInvoker`] as an [`Invoker`].
pub struct InvokerAdapter {
    legacy: Arc<dyn LegacyInvoker>,
}

impl InvokerAdapter {
    pub fn new(legacy: Arc<dyn LegacyInvoker>) -> Self {
        Self { legacy }
    }
}

#[async_trait]
impl Invoker for InvokerAdapter {
    fn id(&self) -> &str {
        self.legacy.id()
    }

    async fn invoke(&self, ctx: &mut RequestContext) -> StageResult {
        let answer = self.legacy.invoke(&ctx.request).await?;
        ctx.response.status = answer.status;
        ctx.response.headers = answer.headers;
        ctx.response.body = answer.body;
        Ok(())
    }
}

/// Default invoker: asks the endpoint manager for the next endpoint and
/// connects to it.
pub struct EndpointInvoker {
    endpoint_manager: Arc<dyn EndpointManager>,
}

impl EndpointInvoker {
    pub fn new(endpoint_manager: Arc<dyn EndpointManager>) -> Self {
        Self { endpoint_manager }
    }
}

#[async_trait]
impl Invoker for EndpointInvoker {
    fn id(&self) -> &str {
        "endpoint-invoker"
    }

    async fn invoke(&self, ctx: &mut RequestContext) -> StageResult {
        match self.endpoint_manager.next(ctx) {
            Some(endpoint) => {
                tracing::debug!("Invoking endpoint {}", endpoint.name());
                endpoint.connect(ctx).await
            }
            None => Err(ctx.interrupt_with(
                ExecutionFailure::new(StatusCode::SERVICE_UNAVAILABLE)
                    .key(NO_ENDPOINT_FOUND_KEY)
                    .message("No endpoint available"),
            )),
        }
    }
}

impl From<Arc<dyn Invoker>> for InvokerSlot {
    fn from(invoker: Arc<dyn Invoker>) -> Self {
        Self::Current(invoker)
    }
}
