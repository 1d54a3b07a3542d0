//! Pass-through collaborators for APIs (or tools) that have nothing to
//! plug in at a given seam.
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use eyre::Result;

use crate::{
    config::ApiDefinition,
    core::{context::RequestContext, error::StageResult, reactor::PolicyComponents},
    ports::{
        AccessPointRegistry, EndpointConnector, EndpointManager, ExecutionPhase, FlowChain,
        FlowChains, NodeStatus, PolicyManager, ProcessorChain, ProcessorChains,
        ResourceLifecycleManager, SecurityChain, SecurityChainFactory,
    },
};

/// Flow, processor or security chain that does nothing.
#[derive(Debug, Clone)]
pub struct NoopChain {
    id: String,
}

impl NoopChain {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl FlowChain for NoopChain {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, _ctx: &mut RequestContext, _phase: ExecutionPhase) -> StageResult {
        Ok(())
    }
}

#[async_trait]
impl ProcessorChain for NoopChain {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, _ctx: &mut RequestContext, _phase: ExecutionPhase) -> StageResult {
        Ok(())
    }
}

#[async_trait]
impl SecurityChain for NoopChain {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, _ctx: &mut RequestContext) -> StageResult {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoopSecurityChainFactory;

impl SecurityChainFactory for NoopSecurityChainFactory {
    fn create(
        &self,
        _api: &ApiDefinition,
        _policy_manager: Arc<dyn PolicyManager>,
    ) -> Arc<dyn SecurityChain> {
        Arc::new(NoopChain::new("security-plan"))
    }
}

/// Policy or resource manager with nothing to manage.
#[derive(Debug, Default)]
pub struct NoopManager;

#[async_trait]
impl PolicyManager for NoopManager {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ResourceLifecycleManager for NoopManager {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Endpoint manager without endpoints; invocations answer 503.
#[derive(Debug, Default)]
pub struct NoEndpoints;

#[async_trait]
impl EndpointManager for NoEndpoints {
    fn next(&self, _ctx: &RequestContext) -> Option<Arc<dyn EndpointConnector>> {
        None
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn pre_stop(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Node status flipped by the host once every server is listening.
#[derive(Debug, Default)]
pub struct NodeState {
    started: AtomicBool,
}

impl NodeState {
    pub fn new(started: bool) -> Self {
        Self {
            started: AtomicBool::new(started),
        }
    }

    pub fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::Release);
    }
}

impl NodeStatus for NodeState {
    fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

pub fn noop_flow_chains() -> FlowChains {
    FlowChains {
        organization: Arc::new(NoopChain::new("organization")),
        plan: Arc::new(NoopChain::new("plan")),
        api: Arc::new(NoopChain::new("api")),
    }
}

pub fn noop_processor_chains() -> ProcessorChains {
    let chain = |id: &str| -> Arc<dyn ProcessorChain> { Arc::new(NoopChain::new(id)) };
    ProcessorChains {
        before_handle: chain("before-handle"),
        before_security: chain("before-security"),
        before_api_execution: chain("before-api-execution"),
        after_api_execution: chain("after-api-execution"),
        on_error: chain("on-error"),
        after_handle: chain("after-handle"),
    }
}

/// Policy components that let every request straight through.
pub fn noop_policies(access_points: Arc<dyn AccessPointRegistry>) -> PolicyComponents {
    PolicyComponents {
        policy_manager: Arc::new(NoopManager),
        resource_manager: Arc::new(NoopManager),
        security_chain_factory: Arc::new(NoopSecurityChainFactory),
        flows: noop_flow_chains(),
        processors: noop_processor_chains(),
        service_factories: Vec::new(),
        access_points,
    }
}
