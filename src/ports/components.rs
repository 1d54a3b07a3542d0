//! Lifecycle-managed collaborators the reactors drive.
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;

use crate::{
    config::ApiDefinition,
    core::{context::RequestContext, error::StageResult},
};

#[async_trait]
pub trait PolicyManager: Send + Sync + 'static {
    async fn start(&self) -> Result<()>;

    async fn pre_stop(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()>;
}

#[async_trait]
pub trait ResourceLifecycleManager: Send + Sync + 'static {
    async fn start(&self) -> Result<()>;

    async fn pre_stop(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()>;
}

/// A concrete backend endpoint reachable through some protocol.
#[async_trait]
pub trait EndpointConnector: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Forward the request held by `ctx` and write the backend answer back into it.
    async fn connect(&self, ctx: &mut RequestContext) -> StageResult;
}

/// Owns the endpoint connectors of one API and hands them out per request.
#[async_trait]
pub trait EndpointManager: Send + Sync + 'static {
    /// Next endpoint to try, honouring the manager's own balancing rules.
    fn next(&self, ctx: &RequestContext) -> Option<Arc<dyn EndpointConnector>>;

    async fn start(&self) -> Result<()>;
    async fn pre_stop(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

/// Whether the gateway node hosting the reactor has finished starting.
pub trait NodeStatus: Send + Sync + 'static {
    fn is_started(&self) -> bool;
}

/// A background service attached to one API (health checks, dynamic properties...).
#[async_trait]
pub trait ApiService: Send + Sync + 'static {
    fn id(&self) -> &str;
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

/// Creates the API service for a definition, or nothing when not applicable.
pub trait ApiServiceFactory: Send + Sync + 'static {
    fn create(&self, api: &ApiDefinition) -> Option<Arc<dyn ApiService>>;
}
