pub mod access_points;
pub mod entrypoint_resolver;
pub mod noop;
pub mod tracer;

/// Re-export commonly used types from adapters
pub use access_points::InMemoryAccessPointRegistry;
pub use entrypoint_resolver::DefaultEntrypointConnectorResolver;
pub use noop::{NoEndpoints, NodeState, NoopChain, NoopManager, NoopSecurityChainFactory};
pub use tracer::TracingTracer;
