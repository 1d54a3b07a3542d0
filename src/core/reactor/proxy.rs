//! Full request pipeline for HTTP-style APIs.
//!
//! ```text
//! ┌ timeout ─────────────────────────────────────────────────────────────┐
//! │ before-handle → org flow → before-security → security → before-api  │
//! │ → entrypoint request → plan/api flows → invoke → plan/api flows     │
//! │ → after-api-execution   (errors classified and resumed)             │
//! └──────────────────────────────────────────────────────────────────────┘
//! → timeout(org response flow) → entrypoint response → after-handle → end
//! ```
//!
//! Errors never escape the pipeline: the classifier after the API stages
//! and the two unexpected-error guards turn them into a response.
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use http::StatusCode;
use once_cell::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::{
    config::{ApiDefinition, ReactorConfig},
    core::{
        acceptor::{Acceptor, http_acceptors},
        chain::StageChain,
        context::RequestContext,
        error::{ExecutionError, ExecutionFailure, ReactorError, StageResult},
        hooks::hooked,
        lifecycle::LifecycleState,
        reactor::{
            ApiReactor, REQUEST_TIMEOUT_KEY, REQUEST_TIMEOUT_MESSAGE, ReactorVariant,
            base::{ReactorBase, ReactorComponents},
        },
    },
    metrics,
    ports::{
        AccessPointRegistry, ApiService, ApiServiceFactory, ExecutionPhase, FlowChain, FlowChains,
        PolicyManager, ProcessorChain, ProcessorChains, ResourceLifecycleManager, SecurityChain,
        SecurityChainFactory,
    },
};

pub const NO_ENTRYPOINT_FAILURE_MESSAGE: &str = "No entrypoint matches the incoming request";

/// Policy side collaborators of a proxy reactor.
#[derive(Clone)]
pub struct PolicyComponents {
    pub policy_manager: Arc<dyn PolicyManager>,
    pub resource_manager: Arc<dyn ResourceLifecycleManager>,
    pub security_chain_factory: Arc<dyn SecurityChainFactory>,
    pub flows: FlowChains,
    pub processors: ProcessorChains,
    pub service_factories: Vec<Arc<dyn ApiServiceFactory>>,
    pub access_points: Arc<dyn AccessPointRegistry>,
}

pub struct ProxyReactor {
    me: Weak<Self>,
    base: ReactorBase,
    policies: PolicyComponents,
    /// Built at start, once the policy manager runs.
    security_chain: OnceCell<Arc<dyn SecurityChain>>,
    services: OnceCell<Vec<Arc<dyn ApiService>>>,
}

impl ProxyReactor {
    pub fn new(
        api: ApiDefinition,
        config: ReactorConfig,
        components: ReactorComponents,
        policies: PolicyComponents,
    ) -> Arc<Self> {
        let no_entrypoint =
            ExecutionFailure::new(StatusCode::NOT_FOUND).message(NO_ENTRYPOINT_FAILURE_MESSAGE);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            base: ReactorBase::new(api, config, components, no_entrypoint),
            policies,
            security_chain: OnceCell::new(),
            services: OnceCell::new(),
        })
    }

    fn pipeline(self: &Arc<Self>) -> StageChain {
        let (count_in, count_out) = self.base.pending_hooks();
        let processors = &self.policies.processors;

        let me = self.clone();
        let chain = StageChain::new()
            .on_start(count_in)
            .chain_with("api-execution", move |ctx| {
                Box::pin(async move {
                    let request = me.request_chain();
                    me.timeout(ctx, request).await
                })
            });

        let me = self.clone();
        let organization = self.policies.flows.organization.clone();
        let chain = chain.chain_with("organization-response-flow", move |ctx| {
            Box::pin(async move {
                let flow = with_flow(
                    StageChain::new(),
                    "organization-flow",
                    &organization,
                    ExecutionPhase::Response,
                );
                me.timeout(ctx, flow).await
            })
        });

        let me = self.clone();
        let chain = chain.chain_with("entrypoint-response", move |ctx| {
            Box::pin(async move { me.handle_entrypoint_response(ctx).await })
        });
        let chain = self.with_unexpected_error_guard(chain);
        let chain = self.with_processors(
            chain,
            "after-handle",
            &processors.after_handle,
            ExecutionPhase::Response,
        );
        let chain = self.with_unexpected_error_guard(chain);

        chain
            .chain_with("end-response", |ctx| {
                Box::pin(async move {
                    ctx.end_response().await?;
                    metrics::increment_request_total(&ctx.metrics.api_id, ctx.metrics.status);
                    Ok(())
                })
            })
            .on_finally(move |_outcome| count_out())
    }

    /// Everything raced against the request deadline.
    fn request_chain(self: &Arc<Self>) -> StageChain {
        let flows = &self.policies.flows;
        let processors = &self.policies.processors;
        let request = ExecutionPhase::Request;
        let response = ExecutionPhase::Response;

        let chain = StageChain::new().chain_with("request-phase-span", |ctx| {
            Box::pin(async move {
                let span = ctx.start_span("request");
                ctx.internal.request_phase_span = span;
                Ok(())
            })
        });
        let chain = self.with_processors(chain, "before-handle", &processors.before_handle, request);
        let chain = with_flow(chain, "organization-flow", &flows.organization, request);
        let chain =
            self.with_processors(chain, "before-security", &processors.before_security, request);

        let me = self.clone();
        let chain = chain.chain_with("security-chain", move |ctx| {
            Box::pin(async move { me.execute_security(ctx).await })
        });
        let chain = self.with_processors(
            chain,
            "before-api-execution",
            &processors.before_api_execution,
            request,
        );

        let me = self.clone();
        let chain = chain.chain_with("entrypoint-request", move |ctx| {
            Box::pin(async move { me.base.handle_entrypoint_request(ctx).await })
        });
        let chain = with_flow(chain, "plan-flow", &flows.plan, request);
        let chain = with_flow(chain, "api-flow", &flows.api, request);
        let chain = chain.chain_with("request-phase-span-end", |ctx| {
            Box::pin(async move {
                if let Some(span) = ctx.internal.request_phase_span.take() {
                    span.end();
                }
                Ok(())
            })
        });

        let me = self.clone();
        let chain = chain
            .chain_with("invoke-backend", move |ctx| {
                Box::pin(async move { me.invoke_backend(ctx).await })
            })
            .chain_with("response-phase-span", |ctx| {
                Box::pin(async move {
                    let span = ctx.start_span("response");
                    ctx.internal.response_phase_span = span;
                    Ok(())
                })
            });
        let chain = with_flow(chain, "plan-flow", &flows.plan, response);
        let chain = with_flow(chain, "api-flow", &flows.api, response);
        let chain = self.with_processors(
            chain,
            "after-api-execution",
            &processors.after_api_execution,
            response,
        );

        let me = self.clone();
        chain
            .chain_with("response-phase-span-end", |ctx| {
                Box::pin(async move {
                    ctx.internal.end_phase_spans(None);
                    Ok(())
                })
            })
            .chain_with_on_error("process-error", move |ctx, error| {
                Box::pin(async move { me.process_error(ctx, error).await })
            })
    }

    fn with_processors(
        self: &Arc<Self>,
        chain: StageChain,
        name: &'static str,
        processors: &Arc<dyn ProcessorChain>,
        phase: ExecutionPhase,
    ) -> StageChain {
        let me = self.clone();
        let processors = processors.clone();
        chain.chain_with(name, move |ctx| {
            Box::pin(async move { me.run_processors(ctx, &processors, phase).await })
        })
    }

    fn with_unexpected_error_guard(self: &Arc<Self>, chain: StageChain) -> StageChain {
        let me = self.clone();
        chain.chain_with_on_error("unexpected-error", move |ctx, error| {
            Box::pin(async move {
                me.handle_unexpected_error(ctx, &error);
                Ok(())
            })
        })
    }

    async fn run_processors(
        &self,
        ctx: &mut RequestContext,
        processors: &Arc<dyn ProcessorChain>,
        phase: ExecutionPhase,
    ) -> StageResult {
        let hooks = self.base.hooks();
        let id = processors.id().to_string();
        let processors = processors.clone();
        hooked(&hooks.processor_chain, &id, ctx, Some(phase), move |ctx| {
            Box::pin(async move { processors.execute(ctx, phase).await })
        })
        .await
    }

    async fn execute_security(&self, ctx: &mut RequestContext) -> StageResult {
        let Some(security) = self.security_chain.get().cloned() else {
            return Err(ExecutionError::unexpected(format!(
                "API {} is not started",
                self.base.api().id
            )));
        };
        let hooks = self.base.hooks();
        let id = security.id().to_string();
        hooked(&hooks.security, &id, ctx, None, move |ctx| {
            Box::pin(async move { security.execute(ctx).await })
        })
        .await
    }

    /// Call the invoker stored in the context, if any, timing the call.
    async fn invoke_backend(&self, ctx: &mut RequestContext) -> StageResult {
        ctx.metrics.endpoint_response_time.start();
        let result = self.invoke(ctx).await;
        self.base.finish_endpoint_timing(ctx);
        result
    }

    async fn invoke(&self, ctx: &mut RequestContext) -> StageResult {
        if ctx.internal.invoker_skip {
            return Ok(());
        }
        let Some(slot) = ctx.internal.invoker.clone() else {
            return Ok(());
        };
        let invoker = slot.resolve();
        let hooks = self.base.hooks();
        let id = invoker.id().to_string();
        hooked(&hooks.invoker, &id, ctx, None, move |ctx| {
            Box::pin(async move { invoker.invoke(ctx).await })
        })
        .await
    }

    /// A benign interruption runs the after-api-execution processors; a
    /// failure runs the on-error processors. An unexpected error is recorded
    /// as a 500 failure first. Always resumes: an error raised by those
    /// processors is logged and dropped.
    async fn process_error(&self, ctx: &mut RequestContext, error: ExecutionError) -> StageResult {
        let processors = &self.policies.processors;
        let result = match error {
            ExecutionError::Interrupted => {
                ctx.internal.end_phase_spans(None);
                self.run_processors(ctx, &processors.after_api_execution, ExecutionPhase::Response)
                    .await
            }
            ExecutionError::InterruptedWithFailure(failure) => {
                ctx.internal.end_phase_spans(Some(&failure.to_string()));
                self.run_processors(ctx, &processors.on_error, ExecutionPhase::Response)
                    .await
            }
            error => {
                error!(
                    api = %self.base.api().id,
                    request_id = %ctx.request.id,
                    "Unexpected error while handling request: {:#}",
                    error
                );
                ctx.internal.end_phase_spans(Some(&error.to_string()));
                self.base.finish_endpoint_timing(ctx);
                ctx.interrupt_with(ExecutionFailure::new(StatusCode::INTERNAL_SERVER_ERROR));
                self.run_processors(ctx, &processors.on_error, ExecutionPhase::Response)
                    .await
            }
        };
        match result {
            Err(error) if !error.is_interruption() => warn!(
                api = %self.base.api().id,
                request_id = %ctx.request.id,
                "Error processors failed: {:#}",
                error
            ),
            Err(error) => debug!(
                api = %self.base.api().id,
                request_id = %ctx.request.id,
                "Interrupted while processing an earlier interruption: {}",
                error
            ),
            Ok(()) => {}
        }
        Ok(())
    }

    fn handle_unexpected_error(&self, ctx: &mut RequestContext, error: &ExecutionError) {
        error!(
            api = %self.base.api().id,
            request_id = %ctx.request.id,
            "Unexpected error while handling request: {:#}",
            error
        );
        self.base.finish_endpoint_timing(ctx);
        ctx.response.status = StatusCode::INTERNAL_SERVER_ERROR;
        ctx.response.reason = StatusCode::INTERNAL_SERVER_ERROR
            .canonical_reason()
            .map(str::to_string);
    }
}

fn with_flow(
    chain: StageChain,
    name: &'static str,
    flow: &Arc<dyn FlowChain>,
    phase: ExecutionPhase,
) -> StageChain {
    let flow = flow.clone();
    chain.chain_with(name, move |ctx| {
        Box::pin(async move { flow.execute(ctx, phase).await })
    })
}

#[async_trait]
impl ReactorVariant for ProxyReactor {
    fn base(&self) -> &ReactorBase {
        &self.base
    }

    async fn on_timeout(&self, ctx: &mut RequestContext) -> StageResult {
        ctx.internal.end_phase_spans(Some(REQUEST_TIMEOUT_MESSAGE));
        self.base.finish_endpoint_timing(ctx);
        ctx.interrupt_with(
            ExecutionFailure::new(StatusCode::GATEWAY_TIMEOUT)
                .key(REQUEST_TIMEOUT_KEY)
                .message(REQUEST_TIMEOUT_MESSAGE),
        );
        self.run_processors(
            ctx,
            &self.policies.processors.on_error,
            ExecutionPhase::Response,
        )
        .await
    }

    async fn stop_now(&self) -> Result<(), ReactorError> {
        let components = self.base.components();
        let mut errors = Vec::new();
        ReactorBase::stop_step(
            &mut errors,
            "entrypoint resolver",
            components.resolver.stop().await,
        );
        ReactorBase::stop_step(
            &mut errors,
            "endpoint manager",
            components.endpoint_manager.stop().await,
        );
        ReactorBase::stop_step(
            &mut errors,
            "policy manager",
            self.policies.policy_manager.stop().await,
        );
        ReactorBase::stop_step(
            &mut errors,
            "resource manager",
            self.policies.resource_manager.stop().await,
        );
        ReactorBase::stop_step(&mut errors, "tracer", components.tracer.stop().await);
        self.base.mark_stopped(errors)
    }
}

#[async_trait]
impl ApiReactor for ProxyReactor {
    fn id(&self) -> &str {
        &self.base.api().id
    }

    fn api(&self) -> &ApiDefinition {
        self.base.api()
    }

    fn state(&self) -> LifecycleState {
        self.base.lifecycle().get()
    }

    fn pending_requests(&self) -> usize {
        self.base.pending().get()
    }

    fn acceptors(&self) -> Vec<Acceptor> {
        self.base.acceptors_with(|| {
            let me: Weak<dyn ApiReactor> = self.me.clone();
            http_acceptors(self.base.api(), &me, &self.policies.access_points)
        })
    }

    async fn handle(self: Arc<Self>, mut ctx: RequestContext) -> RequestContext {
        let _timer = metrics::RequestTimer::new(&self.base.api().id);
        self.base.prepare_common_attributes(&mut ctx);
        if let Err(error) = self.pipeline().execute(&mut ctx).await {
            error!(
                api = %self.base.api().id,
                request_id = %ctx.request.id,
                "Unable to send the response: {:#}",
                error
            );
        }
        ctx
    }

    async fn start(&self) -> Result<(), ReactorError> {
        self.base.lifecycle().advance(LifecycleState::Starting)?;
        let api = self.base.api();
        let components = self.base.components();
        info!("Starting API {} ({})", api.name, api.id);

        self.policies
            .resource_manager
            .start()
            .await
            .map_err(|e| ReactorError::component("resource manager", "start", e))?;
        self.policies
            .policy_manager
            .start()
            .await
            .map_err(|e| ReactorError::component("policy manager", "start", e))?;

        let security = self
            .policies
            .security_chain_factory
            .create(api, self.policies.policy_manager.clone());
        if self.security_chain.set(security).is_err() {
            warn!("Security chain of API {} was already built", api.id);
        }

        components
            .tracer
            .start()
            .await
            .map_err(|e| ReactorError::component("tracer", "start", e))?;
        self.base.install_hooks();

        components
            .endpoint_manager
            .start()
            .await
            .map_err(|e| ReactorError::component("endpoint manager", "start", e))?;

        // Services started before a failing one are kept so stop() reaches them.
        let mut services = Vec::new();
        let mut failure = None;
        for factory in &self.policies.service_factories {
            if let Some(service) = factory.create(api) {
                if let Err(e) = service.start().await {
                    failure = Some(ReactorError::component("api service", "start", e));
                    break;
                }
                info!("API service {} started for API {}", service.id(), api.id);
                services.push(service);
            }
        }
        if self.services.set(services).is_err() {
            warn!("API services of API {} were already started", api.id);
        }
        if let Some(error) = failure {
            return Err(error);
        }

        self.base.lifecycle().advance(LifecycleState::Started)?;
        self.base.log_acceptors(&self.acceptors());
        Ok(())
    }

    async fn stop(&self) -> Result<(), ReactorError> {
        self.base.begin_stop()?;
        let api_id = &self.base.api().id;
        let components = self.base.components();

        if let Some(services) = self.services.get() {
            for service in services {
                if let Err(e) = service.stop().await {
                    warn!("Unable to stop API service {} of API {}: {:#}", service.id(), api_id, e);
                }
            }
        }
        if let Err(e) = components.resolver.pre_stop().await {
            warn!("Entrypoint resolver pre-stop failed for API {}: {:#}", api_id, e);
        }
        if let Err(e) = components.endpoint_manager.pre_stop().await {
            warn!("Endpoint manager pre-stop failed for API {}: {:#}", api_id, e);
        }
        if let Err(e) = self.policies.policy_manager.pre_stop().await {
            warn!("Policy manager pre-stop failed for API {}: {:#}", api_id, e);
        }
        if let Err(e) = self.policies.resource_manager.pre_stop().await {
            warn!("Resource manager pre-stop failed for API {}: {:#}", api_id, e);
        }

        match self.me.upgrade() {
            Some(me) => self.base.stop(me).await,
            None => self.stop_now().await,
        }
    }

    async fn wait_for_state(&self, state: LifecycleState) {
        self.base.lifecycle().wait_for(state).await
    }
}
