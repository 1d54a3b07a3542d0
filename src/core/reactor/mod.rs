//! Reactors: one instance per deployed API, owning its lifecycle, its
//! in-flight request accounting and its request pipeline.
//!
//! [`ProxyReactor`] runs the full pipeline (processors, flows, security,
//! invocation). [`StreamReactor`] runs the reduced one used by raw TCP APIs.
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::ApiDefinition,
    core::{
        acceptor::Acceptor,
        chain::StageChain,
        context::RequestContext,
        error::{ReactorError, StageResult},
        lifecycle::LifecycleState,
    },
    metrics,
};

pub mod base;
pub mod proxy;
pub mod stream;

pub use base::{HookSet, ReactorBase, ReactorComponents};
pub use proxy::{PolicyComponents, ProxyReactor};
pub use stream::StreamReactor;

pub const REQUEST_TIMEOUT_KEY: &str = "REQUEST_TIMEOUT";
pub const REQUEST_TIMEOUT_MESSAGE: &str = "Request timeout";

/// What the gateway (router, deployer) sees of a reactor.
#[async_trait]
pub trait ApiReactor: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn api(&self) -> &ApiDefinition;

    fn state(&self) -> LifecycleState;

    fn pending_requests(&self) -> usize;

    /// Routing descriptors, computed on first call and cached.
    fn acceptors(&self) -> Vec<Acceptor>;

    /// Drive one request through the pipeline. Never fails: every error is
    /// turned into a response on the returned context.
    async fn handle(self: Arc<Self>, ctx: RequestContext) -> RequestContext;

    async fn start(&self) -> Result<(), ReactorError>;

    /// Begin a graceful stop. Returns once draining has been scheduled; use
    /// [`wait_for_state`](Self::wait_for_state) to await completion.
    async fn stop(&self) -> Result<(), ReactorError>;

    async fn wait_for_state(&self, state: LifecycleState);
}

/// The per-variant behavior the shared base delegates to.
#[async_trait]
pub trait ReactorVariant: Send + Sync + 'static {
    fn base(&self) -> &ReactorBase;

    /// Runs in place of a stage cancelled by the request deadline.
    async fn on_timeout(&self, ctx: &mut RequestContext) -> StageResult;

    /// Release every component and move to `Stopped`.
    async fn stop_now(&self) -> Result<(), ReactorError>;

    /// Race `chain` against the remaining request budget. With timeouts
    /// disabled the chain runs unbounded.
    async fn timeout(&self, ctx: &mut RequestContext, chain: StageChain) -> StageResult {
        let elapsed = ctx.request.timestamp.elapsed();
        let Some(deadline) = self.base().config().request_timeout.deadline(elapsed) else {
            return chain.execute(ctx).await;
        };

        let outcome = tokio::time::timeout(deadline, chain.execute(ctx)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                let api_id = &self.base().api().id;
                tracing::warn!(
                    api = %api_id,
                    request_id = %ctx.request.id,
                    "Request timed out after {:?}",
                    deadline
                );
                metrics::increment_request_timeouts(api_id);
                self.on_timeout(ctx).await
            }
        }
    }

    /// Adapt the response through the resolved entrypoint connector, unless
    /// a failure is already recorded.
    async fn handle_entrypoint_response(&self, ctx: &mut RequestContext) -> StageResult {
        if ctx.execution_failure().is_some() {
            return Ok(());
        }
        let Some(connector) = ctx.internal.entrypoint_connector.clone() else {
            return Ok(());
        };
        let chain = StageChain::new().chain_with("entrypoint-response", move |ctx| {
            Box::pin(async move { connector.handle_response(ctx).await })
        });
        self.timeout(ctx, chain).await
    }
}
