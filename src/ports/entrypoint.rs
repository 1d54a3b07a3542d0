use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;

use crate::core::{context::RequestContext, error::StageResult};

/// Protocol adapter turning an inbound transport exchange into the
/// request context shape and back.
#[async_trait]
pub trait EntrypointConnector: Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Higher priorities are tried first by the default resolver.
    fn priority(&self) -> i32 {
        0
    }

    /// Whether this connector understands the inbound request.
    fn matches(&self, _ctx: &RequestContext) -> bool {
        true
    }

    async fn handle_request(&self, ctx: &mut RequestContext) -> StageResult;

    async fn handle_response(&self, ctx: &mut RequestContext) -> StageResult;

    async fn pre_stop(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Picks the entrypoint connector able to serve a request.
#[async_trait]
pub trait EntrypointConnectorResolver: Send + Sync + 'static {
    fn resolve(&self, ctx: &RequestContext) -> Option<Arc<dyn EntrypointConnector>>;

    async fn pre_stop(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}
