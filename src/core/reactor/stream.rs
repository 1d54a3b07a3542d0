//! Reduced pipeline for raw TCP APIs: no policies, only entrypoint
//! adaptation and invocation.
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::{
    config::{ApiDefinition, ReactorConfig},
    core::{
        acceptor::{Acceptor, tcp_acceptors},
        chain::StageChain,
        context::RequestContext,
        error::{ExecutionError, ExecutionFailure, ReactorError, StageResult},
        hooks::hooked,
        invoker::InvokerSlot,
        lifecycle::LifecycleState,
        reactor::{
            ApiReactor, REQUEST_TIMEOUT_KEY, REQUEST_TIMEOUT_MESSAGE, ReactorVariant,
            base::{ReactorBase, ReactorComponents},
        },
    },
    metrics,
};

pub const NO_ENTRYPOINT_KEY: &str = "NO_ENTRYPOINT";

pub struct StreamReactor {
    me: Weak<Self>,
    base: ReactorBase,
}

impl StreamReactor {
    pub fn new(api: ApiDefinition, config: ReactorConfig, components: ReactorComponents) -> Arc<Self> {
        let no_entrypoint = ExecutionFailure::new(StatusCode::INTERNAL_SERVER_ERROR)
            .key(NO_ENTRYPOINT_KEY)
            .message("No entrypoint matches the incoming connection");
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            base: ReactorBase::new(api, config, components, no_entrypoint),
        })
    }

    fn pipeline(self: &Arc<Self>) -> StageChain {
        let (count_in, count_out) = self.base.pending_hooks();

        let me = self.clone();
        let chain = StageChain::new()
            .on_start(count_in)
            .chain_with("connection", move |ctx| {
                Box::pin(async move {
                    let request = me.request_chain();
                    me.timeout(ctx, request).await
                })
            });

        let me = self.clone();
        let chain = chain.chain_with("entrypoint-response", move |ctx| {
            Box::pin(async move { me.handle_entrypoint_response(ctx).await })
        });

        let me = self.clone();
        chain
            .chain_with_on_error("handle-error", move |ctx, error| {
                Box::pin(async move {
                    me.handle_error(ctx, error);
                    Ok(())
                })
            })
            .chain_with("end-response", |ctx| {
                Box::pin(async move {
                    ctx.end_response().await?;
                    metrics::increment_request_total(&ctx.metrics.api_id, ctx.metrics.status);
                    Ok(())
                })
            })
            .on_finally(move |_outcome| count_out())
    }

    fn request_chain(self: &Arc<Self>) -> StageChain {
        let me = self.clone();
        let chain = StageChain::new().chain_with("entrypoint-request", move |ctx| {
            Box::pin(async move { me.base.handle_entrypoint_request(ctx).await })
        });
        let me = self.clone();
        chain.chain_with("invoke-backend", move |ctx| {
            Box::pin(async move { me.invoke(ctx).await })
        })
    }

    /// Raw connections only carry the current invoker shape.
    async fn invoke(&self, ctx: &mut RequestContext) -> StageResult {
        let invoker = match ctx.internal.invoker.clone() {
            Some(InvokerSlot::Current(invoker)) => invoker,
            Some(InvokerSlot::Legacy(legacy)) => {
                return Err(ExecutionError::unexpected(format!(
                    "Invoker {} cannot serve raw connections",
                    legacy.id()
                )));
            }
            None => return Ok(()),
        };
        let hooks = self.base.hooks();
        let id = invoker.id().to_string();
        hooked(&hooks.invoker, &id, ctx, None, move |ctx| {
            Box::pin(async move { invoker.invoke(ctx).await })
        })
        .await
    }

    /// Interruptions already carry what to render; anything else becomes a 500.
    fn handle_error(&self, ctx: &mut RequestContext, error: ExecutionError) {
        if error.is_interruption() {
            debug!(
                "Connection {} on API {} interrupted: {}",
                ctx.request.id,
                self.base.api().id,
                error
            );
            return;
        }
        error!(
            api = %self.base.api().id,
            request_id = %ctx.request.id,
            "Unexpected error while handling connection: {:#}",
            error
        );
        ctx.response.status = StatusCode::INTERNAL_SERVER_ERROR;
        ctx.response.reason = StatusCode::INTERNAL_SERVER_ERROR
            .canonical_reason()
            .map(str::to_string);
    }
}

#[async_trait]
impl ReactorVariant for StreamReactor {
    fn base(&self) -> &ReactorBase {
        &self.base
    }

    async fn on_timeout(&self, ctx: &mut RequestContext) -> StageResult {
        ctx.interrupt_with(
            ExecutionFailure::new(StatusCode::GATEWAY_TIMEOUT)
                .key(REQUEST_TIMEOUT_KEY)
                .message(REQUEST_TIMEOUT_MESSAGE),
        );
        Ok(())
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
        if self.base.analytics().tracing_enabled {
            ReactorBase::stop_step(&mut errors, "tracer", components.tracer.stop().await);
        }
        self.base.mark_stopped(errors)
    }
}

#[async_trait]
impl ApiReactor for StreamReactor {
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
            tcp_acceptors(self.base.api(), &me)
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
        info!("Starting TCP API {} ({})", api.name, api.id);

        self.base
            .components()
            .endpoint_manager
            .start()
            .await
            .map_err(|e| ReactorError::component("endpoint manager", "start", e))?;
        if self.base.analytics().tracing_enabled {
            self.base
                .components()
                .tracer
                .start()
                .await
                .map_err(|e| ReactorError::component("tracer", "start", e))?;
        }
        self.base.install_hooks();

        self.base.lifecycle().advance(LifecycleState::Started)?;
        self.base.log_acceptors(&self.acceptors());
        Ok(())
    }

    async fn stop(&self) -> Result<(), ReactorError> {
        self.base.begin_stop()?;
        let api_id = &self.base.api().id;
        let components = self.base.components();
        if let Err(e) = components.resolver.pre_stop().await {
            warn!("Entrypoint resolver pre-stop failed for API {}: {:#}", api_id, e);
        }
        if let Err(e) = components.endpoint_manager.pre_stop().await {
            warn!("Endpoint manager pre-stop failed for API {}: {:#}", api_id, e);
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
