//! Axon Reactor - the per-request execution core of an API gateway.
//!
//! One reactor is built per deployed API. It owns the API's lifecycle and
//! drives every inbound request through entrypoint adaptation, security,
//! policy flows, backend invocation (with optional failover) and response
//! delivery, all under a request deadline. Stopping a reactor drains
//! in-flight requests before releasing its components.
//!
//! # Features
//! - Ordered stage chains with error interception and cancellation-safe terminal hooks
//! - Full proxy pipeline and reduced stream (TCP) pipeline
//! - Request deadline with grace delay; `request_timeout_ms <= 0` disables it
//! - Failover invoker with per-attempt budget and circuit breaker
//! - Tracing and logging hooks around processor chains, security and invocation
//! - Acceptors (routing descriptors) with static or access-point resolved hosts
//! - Graceful drain bounded by `pending_requests_timeout_ms`
//! - Metrics on the `metrics` facade & structured tracing via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use axon_reactor::{
//!     adapters::{
//!         DefaultEntrypointConnectorResolver, InMemoryAccessPointRegistry, NoEndpoints, NodeState,
//!         noop::noop_policies,
//!     },
//!     config::{ReactorConfig, load_api_definition},
//!     core::{ReactorComponents, ReactorFactory},
//!     ports::NoopTracer,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let api = load_api_definition("api.yaml")?;
//! let components = ReactorComponents {
//!     resolver: Arc::new(DefaultEntrypointConnectorResolver::new(Vec::new())),
//!     endpoint_manager: Arc::new(NoEndpoints),
//!     node: Arc::new(NodeState::new(true)),
//!     tracer: Arc::new(NoopTracer),
//! };
//! let policies = noop_policies(Arc::new(InMemoryAccessPointRegistry::new()));
//! let reactor = ReactorFactory::new(ReactorConfig::default()).create(api, components, policies);
//! reactor.start().await?;
//! // Route requests with `reactor.acceptors()` and `reactor.clone().handle(ctx)`.
//! reactor.stop().await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! Collaborator contracts live in [`ports`], in-crate implementations in
//! [`adapters`], and the pipeline and lifecycle logic in [`core`].
//!
//! # Error Handling
//! Pipeline stages return [`core::ExecutionError`]; lifecycle operations
//! return [`core::ReactorError`]. Collaborators report `eyre::Result`.
pub mod adapters;
pub mod config;
pub mod core;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;

pub use crate::core::{
    ApiReactor, ExecutionError, ExecutionFailure, GatewayRequest, GatewayResponse, LifecycleState,
    ProxyReactor, ReactorError, ReactorFactory, RequestContext, StreamReactor,
};
