pub mod acceptor;
pub mod chain;
pub mod context;
pub mod error;
pub mod factory;
pub mod failover;
pub mod hooks;
pub mod invoker;
pub mod lifecycle;
pub mod reactor;

pub use acceptor::{Acceptor, AcceptorHost, HttpAcceptor, TcpAcceptor};
pub use chain::{ChainOutcome, StageChain};
pub use context::{GatewayRequest, GatewayResponse, RequestContext};
pub use error::{ExecutionError, ExecutionFailure, ReactorError, StageResult};
pub use factory::ReactorFactory;
pub use failover::{CircuitBreaker, CircuitState, FailoverInvoker};
pub use hooks::{Hook, LoggingHook, TracingHook};
pub use invoker::{EndpointInvoker, Invoker, InvokerAdapter, InvokerSlot, LegacyInvoker};
pub use lifecycle::{LifecycleState, PendingRequests};
pub use reactor::{
    ApiReactor, PolicyComponents, ProxyReactor, ReactorComponents, ReactorVariant, StreamReactor,
};
