//! State and behavior shared by every reactor variant: common context
//! attributes, entrypoint dispatch, endpoint timing, and the graceful drain
//! that gates `Stopped` on in-flight requests.
use std::{fmt, sync::Arc, time::Duration};

use once_cell::sync::OnceCell;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    config::{ApiDefinition, LoggingMode, ReactorConfig, validation::parse_size},
    core::{
        acceptor::Acceptor,
        context::{
            ATTR_API, ATTR_API_DEPLOYED_AT, ATTR_CONTEXT_PATH, ATTR_ENVIRONMENT, ATTR_ORGANIZATION,
            AnalyticsContext, EndpointTiming, RequestContext,
        },
        error::{ExecutionFailure, ReactorError, StageResult},
        failover::FailoverInvoker,
        hooks::{Hook, LoggingHook, TracingHook},
        invoker::{EndpointInvoker, Invoker, InvokerSlot},
        lifecycle::{LifecycleCell, LifecycleState, PendingRequests},
        reactor::ReactorVariant,
    },
    metrics,
    ports::{EndpointManager, EntrypointConnectorResolver, NodeStatus, Tracer},
};

/// Poll period of the graceful drain.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Collaborators every reactor variant needs.
#[derive(Clone)]
pub struct ReactorComponents {
    pub resolver: Arc<dyn EntrypointConnectorResolver>,
    pub endpoint_manager: Arc<dyn EndpointManager>,
    pub node: Arc<dyn NodeStatus>,
    pub tracer: Arc<dyn Tracer>,
}

/// Hooks installed at start, grouped by the component kind they wrap.
#[derive(Default, Clone)]
pub struct HookSet {
    pub processor_chain: Vec<Arc<dyn Hook>>,
    pub security: Vec<Arc<dyn Hook>>,
    pub invoker: Vec<Arc<dyn Hook>>,
}

impl HookSet {
    pub fn for_analytics(analytics: &AnalyticsContext) -> Self {
        let mut hooks = Self::default();
        if analytics.tracing_enabled {
            hooks
                .processor_chain
                .push(Arc::new(TracingHook::new("processor-chain")));
            hooks.invoker.push(Arc::new(TracingHook::new("invoker")));
            hooks
                .security
                .push(Arc::new(TracingHook::new("security-plan")));
            if analytics.tracing_verbose {
                hooks
                    .processor_chain
                    .push(Arc::new(TracingHook::verbose("processor-chain")));
                hooks.invoker.push(Arc::new(TracingHook::verbose("invoker")));
                hooks
                    .security
                    .push(Arc::new(TracingHook::verbose("security-plan")));
            }
        }
        if analytics.is_logging_enabled() {
            hooks.invoker.push(Arc::new(LoggingHook));
        }
        hooks
    }

    pub fn is_empty(&self) -> bool {
        self.processor_chain.is_empty() && self.security.is_empty() && self.invoker.is_empty()
    }
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = |hooks: &[Arc<dyn Hook>]| hooks.iter().map(|h| h.id().to_string()).collect::<Vec<_>>();
        f.debug_struct("HookSet")
            .field("processor_chain", &ids(&self.processor_chain))
            .field("security", &ids(&self.security))
            .field("invoker", &ids(&self.invoker))
            .finish()
    }
}

pub struct ReactorBase {
    api: Arc<ApiDefinition>,
    config: ReactorConfig,
    lifecycle: LifecycleCell,
    pending: PendingRequests,
    components: ReactorComponents,
    analytics: Arc<AnalyticsContext>,
    default_invoker: Arc<dyn Invoker>,
    no_entrypoint_failure: ExecutionFailure,
    hooks: OnceCell<Arc<HookSet>>,
    acceptors: OnceCell<Vec<Acceptor>>,
}

impl ReactorBase {
    pub fn new(
        api: ApiDefinition,
        config: ReactorConfig,
        components: ReactorComponents,
        no_entrypoint_failure: ExecutionFailure,
    ) -> Self {
        let analytics = Arc::new(analytics_context(&api, &config));
        let endpoint_invoker: Arc<dyn Invoker> =
            Arc::new(EndpointInvoker::new(components.endpoint_manager.clone()));
        let default_invoker: Arc<dyn Invoker> = if api.failover_enabled() {
            Arc::new(FailoverInvoker::new(
                endpoint_invoker,
                api.failover.clone(),
                api.id.clone(),
            ))
        } else {
            endpoint_invoker
        };

        Self {
            api: Arc::new(api),
            config,
            lifecycle: LifecycleCell::new(),
            pending: PendingRequests::new(),
            components,
            analytics,
            default_invoker,
            no_entrypoint_failure,
            hooks: OnceCell::new(),
            acceptors: OnceCell::new(),
        }
    }

    pub fn api(&self) -> &ApiDefinition {
        &self.api
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    pub fn components(&self) -> &ReactorComponents {
        &self.components
    }

    pub fn lifecycle(&self) -> &LifecycleCell {
        &self.lifecycle
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    pub fn analytics(&self) -> &Arc<AnalyticsContext> {
        &self.analytics
    }

    /// Hooks installed at start; empty before that.
    pub fn hooks(&self) -> Arc<HookSet> {
        self.hooks.get().cloned().unwrap_or_default()
    }

    pub(crate) fn install_hooks(&self) {
        let hooks = HookSet::for_analytics(&self.analytics);
        if !hooks.is_empty() {
            debug!("Hooks enabled for API {}: {:?}", self.api.id, hooks);
        }
        if self.hooks.set(Arc::new(hooks)).is_err() {
            debug!("Hooks already installed for API {}", self.api.id);
        }
    }

    pub(crate) fn acceptors_with(&self, compute: impl FnOnce() -> Vec<Acceptor>) -> Vec<Acceptor> {
        self.acceptors.get_or_init(compute).clone()
    }

    pub(crate) fn log_acceptors(&self, acceptors: &[Acceptor]) {
        info!(
            "API {} ({}) deployed with {} acceptor(s)",
            self.api.name,
            self.api.id,
            acceptors.len()
        );
        for acceptor in acceptors {
            debug!("  {}", acceptor);
        }
    }

    /// Attributes, internal attributes and metrics every pipeline starts from.
    pub fn prepare_common_attributes(&self, ctx: &mut RequestContext) {
        let api = &self.api;
        ctx.set_attribute(ATTR_API, api.id.clone());
        ctx.set_attribute(ATTR_API_DEPLOYED_AT, api.deployed_at.timestamp_millis());
        ctx.set_attribute(ATTR_ORGANIZATION, api.organization_id.clone());
        ctx.set_attribute(ATTR_ENVIRONMENT, api.environment_id.clone());
        let context_path = ctx.request.context_path.clone();
        ctx.set_attribute(ATTR_CONTEXT_PATH, Value::from(context_path));

        ctx.internal.invoker = Some(InvokerSlot::Current(self.default_invoker.clone()));
        ctx.internal.validate_subscription = self.config.validate_subscription;
        ctx.internal.analytics = Some(self.analytics.clone());
        if self.analytics.tracing_enabled {
            ctx.tracer = self.components.tracer.clone();
        }

        ctx.metrics.api_id = api.id.clone();
        ctx.metrics.api_name = api.name.clone();
        ctx.metrics.api_type = Some(api.api_type);
        ctx.metrics.path_info = ctx.request.path_info().to_string();
    }

    /// Resolve the entrypoint connector and let it adapt the request.
    pub async fn handle_entrypoint_request(&self, ctx: &mut RequestContext) -> StageResult {
        match self.components.resolver.resolve(ctx) {
            Some(connector) => {
                ctx.internal.entrypoint_connector = Some(connector.clone());
                connector.handle_request(ctx).await
            }
            None => {
                debug!(
                    "No entrypoint matches request {} on API {}",
                    ctx.request.id, self.api.id
                );
                Err(ctx.interrupt_with(self.no_entrypoint_failure.clone()))
            }
        }
    }

    /// Freeze the endpoint response time if it is still running.
    pub fn finish_endpoint_timing(&self, ctx: &mut RequestContext) {
        if let EndpointTiming::Started(_) = ctx.metrics.endpoint_response_time {
            ctx.metrics.endpoint_response_time.finish();
            if let Some(duration) = ctx.metrics.endpoint_response_time.duration() {
                metrics::record_endpoint_response_time(&self.api.id, duration);
            }
        }
    }

    /// Start and terminal callbacks counting a pipeline in and out.
    pub(crate) fn pending_hooks(&self) -> (impl FnOnce() + Send + 'static, impl FnOnce() + Send + 'static) {
        let (pending, api_id) = (self.pending.clone(), self.api.id.clone());
        let start = move || {
            let count = pending.increment();
            metrics::set_pending_requests(&api_id, count);
        };
        let (pending, api_id) = (self.pending.clone(), self.api.id.clone());
        let finish = move || {
            let count = pending.decrement();
            metrics::set_pending_requests(&api_id, count);
        };
        (start, finish)
    }

    /// Enter `Stopping`. Valid from any earlier state so a reactor whose
    /// start failed halfway still releases what it had started.
    pub(crate) fn begin_stop(&self) -> Result<(), ReactorError> {
        let previous = self.lifecycle.advance(LifecycleState::Stopping)?;
        if previous != LifecycleState::Started {
            debug!("Stopping API {} from state {}", self.api.id, previous);
        }
        Ok(())
    }

    /// Graceful stop, called once the reactor is `Stopping`. Before the node
    /// is fully started nothing is serving traffic yet, so components are
    /// released at once.
    pub async fn stop<V: ReactorVariant>(&self, variant: Arc<V>) -> Result<(), ReactorError> {
        if !self.components.node.is_started() {
            debug!("Node not started, stopping API {} immediately", self.api.id);
            return variant.stop_now().await;
        }

        info!(
            "Stopping API {} once {} pending request(s) complete",
            self.api.id,
            self.pending.get()
        );
        tokio::spawn(stop_until(variant));
        Ok(())
    }

    /// Run one `stop_now` step, keeping its error for the final report.
    pub(crate) fn stop_step(
        errors: &mut Vec<ReactorError>,
        component: &'static str,
        result: eyre::Result<()>,
    ) {
        if let Err(source) = result {
            warn!("Unable to stop {}: {:#}", component, source);
            errors.push(ReactorError::component(component, "stop", source));
        }
    }

    /// Move to `Stopped` whatever happened to the components.
    pub(crate) fn mark_stopped(&self, errors: Vec<ReactorError>) -> Result<(), ReactorError> {
        if let Err(error) = self.lifecycle.advance(LifecycleState::Stopped) {
            debug!("API {}: {}", self.api.id, error);
        }
        info!("API {} stopped", self.api.id);
        match errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Wait for in-flight requests, polling every [`STOP_POLL_INTERVAL`], then
/// call `stop_now` exactly once. Gives up waiting after the configured
/// pending-requests timeout.
pub async fn stop_until<V: ReactorVariant + ?Sized>(variant: Arc<V>) {
    let base = variant.base();
    let timeout = base.config.pending_requests_timeout();
    let started = Instant::now();
    let mut ticks = tokio::time::interval_at(started + STOP_POLL_INTERVAL, STOP_POLL_INTERVAL);

    loop {
        ticks.tick().await;
        let pending = base.pending.get();
        if pending == 0 {
            debug!("No pending request left on API {}", base.api.id);
            break;
        }
        if started.elapsed() >= timeout {
            warn!(
                "API {} still has {} pending request(s) after {:?}, forcing stop",
                base.api.id, pending, timeout
            );
            break;
        }
        debug!(
            "Waiting for {} pending request(s) on API {}",
            pending, base.api.id
        );
    }

    if let Err(error) = variant.stop_now().await {
        warn!("API {} stopped with errors: {}", base.api.id, error);
    }
}

fn analytics_context(api: &ApiDefinition, config: &ReactorConfig) -> AnalyticsContext {
    let analytics = &api.analytics;
    let tracing = analytics.tracing.clone().unwrap_or_default();
    let tracing_enabled = analytics.enabled && config.tracing.enabled && tracing.enabled;

    AnalyticsContext {
        enabled: analytics.enabled,
        logging_mode: analytics
            .logging
            .as_ref()
            .map(|logging| logging.mode)
            .unwrap_or(LoggingMode::None),
        tracing_enabled,
        tracing_verbose: tracing_enabled && tracing.verbose,
        logging_max_size: config.logging.max_size.as_deref().and_then(parse_size),
        logging_excluded_response_types: config
            .logging
            .excluded_response_types
            .as_deref()
            .map(|types| {
                types
                    .split(',')
                    .map(|t| t.trim().to_ascii_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
    }
}
