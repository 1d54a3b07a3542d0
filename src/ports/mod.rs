//! Collaborator contracts consumed by the reactors.
pub mod access_point;
pub mod components;
pub mod entrypoint;
pub mod policy;
pub mod tracer;
pub mod transport;

pub use access_point::AccessPointRegistry;
pub use components::{
    ApiService, ApiServiceFactory, EndpointConnector, EndpointManager, NodeStatus, PolicyManager,
    ResourceLifecycleManager,
};
pub use entrypoint::{EntrypointConnector, EntrypointConnectorResolver};
pub use policy::{
    ExecutionPhase, FlowChain, FlowChains, ProcessorChain, ProcessorChains, SecurityChain,
    SecurityChainFactory,
};
pub use tracer::{NoopTracer, TraceSpan, Tracer};
pub use transport::ResponseTransport;
