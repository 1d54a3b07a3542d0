use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::{
    config::ApiDefinition,
    core::{context::RequestContext, error::StageResult},
    ports::components::PolicyManager,
};

/// Half of the request lifecycle a chain executes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPhase {
    Request,
    Response,
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Response => write!(f, "response"),
        }
    }
}

/// Policy flows scoped to an organization, a plan or an API.
#[async_trait]
pub trait FlowChain: Send + Sync + 'static {
    fn id(&self) -> &str;

    async fn execute(&self, ctx: &mut RequestContext, phase: ExecutionPhase) -> StageResult;
}

/// Gateway-internal processors (context setup, error rendering, logging).
#[async_trait]
pub trait ProcessorChain: Send + Sync + 'static {
    fn id(&self) -> &str;

    async fn execute(&self, ctx: &mut RequestContext, phase: ExecutionPhase) -> StageResult;
}

/// Plan and credential resolution. May interrupt with a failure.
#[async_trait]
pub trait SecurityChain: Send + Sync + 'static {
    fn id(&self) -> &str {
        "security-plan"
    }

    async fn execute(&self, ctx: &mut RequestContext) -> StageResult;
}

/// Builds the security chain once the policy manager is running.
pub trait SecurityChainFactory: Send + Sync + 'static {
    fn create(
        &self,
        api: &ApiDefinition,
        policy_manager: Arc<dyn PolicyManager>,
    ) -> Arc<dyn SecurityChain>;
}

/// The processor chains a proxy reactor runs around its flows.
#[derive(Clone)]
pub struct ProcessorChains {
    pub before_handle: Arc<dyn ProcessorChain>,
    pub before_security: Arc<dyn ProcessorChain>,
    pub before_api_execution: Arc<dyn ProcessorChain>,
    pub after_api_execution: Arc<dyn ProcessorChain>,
    pub on_error: Arc<dyn ProcessorChain>,
    pub after_handle: Arc<dyn ProcessorChain>,
}

/// Organization, plan and API flows of one deployed API.
#[derive(Clone)]
pub struct FlowChains {
    pub organization: Arc<dyn FlowChain>,
    pub plan: Arc<dyn FlowChain>,
    pub api: Arc<dyn FlowChain>,
}
