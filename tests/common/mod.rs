// Shared collaborators for reactor integration tests. Every collaborator
// appends to one journal so tests can assert on the exact call order.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, OnceLock, Weak,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axon_reactor::{
    adapters::{DefaultEntrypointConnectorResolver, InMemoryAccessPointRegistry, NodeState},
    config::{ApiDefinition, HttpListener, Listener, ListenerPath, ReactorConfig, TcpListener},
    core::{
        ApiReactor, ExecutionError, ExecutionFailure, GatewayRequest, GatewayResponse,
        LifecycleState, ReactorComponents, ReactorFactory, RequestContext, StageResult,
        reactor::PolicyComponents,
    },
    ports::{
        ApiService, ApiServiceFactory, EndpointConnector, EndpointManager, EntrypointConnector,
        ExecutionPhase, FlowChain, FlowChains, PolicyManager, ProcessorChain, ProcessorChains,
        ResourceLifecycleManager, ResponseTransport, SecurityChain, SecurityChainFactory,
        TraceSpan, Tracer,
    },
};
use bytes::Bytes;
use http::{Method, StatusCode};

pub type Journal = Arc<Mutex<Vec<String>>>;

fn push(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

/// What a recording chain does when executed for a given phase.
#[derive(Clone, Copy)]
pub enum Behavior {
    Interrupt,
    Fail(StatusCode),
    Error,
    Sleep(Duration),
    Apply(fn(&mut RequestContext)),
}

impl Behavior {
    async fn apply(self, ctx: &mut RequestContext) -> StageResult {
        match self {
            Behavior::Interrupt => Err(ctx.interrupt()),
            Behavior::Fail(status) => Err(ctx.interrupt_with(
                ExecutionFailure::new(status)
                    .key("POLICY_FAILURE")
                    .message("Rejected by policy"),
            )),
            Behavior::Error => Err(ExecutionError::unexpected("policy exploded")),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            Behavior::Apply(f) => {
                f(ctx);
                Ok(())
            }
        }
    }
}

type Behaviors = Arc<HashMap<String, Behavior>>;

/// Flow, processor or security chain journaling `"<id>:<phase>"`.
pub struct RecordingChain {
    id: String,
    journal: Journal,
    behaviors: Behaviors,
}

impl RecordingChain {
    async fn run(&self, ctx: &mut RequestContext, phase: ExecutionPhase) -> StageResult {
        let key = format!("{}:{}", self.id, phase);
        push(&self.journal, key.clone());
        match self.behaviors.get(&key) {
            Some(behavior) => behavior.apply(ctx).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl FlowChain for RecordingChain {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, ctx: &mut RequestContext, phase: ExecutionPhase) -> StageResult {
        self.run(ctx, phase).await
    }
}

#[async_trait]
impl ProcessorChain for RecordingChain {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, ctx: &mut RequestContext, phase: ExecutionPhase) -> StageResult {
        self.run(ctx, phase).await
    }
}

#[async_trait]
impl SecurityChain for RecordingChain {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, ctx: &mut RequestContext) -> StageResult {
        self.run(ctx, ExecutionPhase::Request).await
    }
}

struct RecordingSecurityFactory {
    journal: Journal,
    behaviors: Behaviors,
}

impl SecurityChainFactory for RecordingSecurityFactory {
    fn create(
        &self,
        _api: &ApiDefinition,
        _policy_manager: Arc<dyn PolicyManager>,
    ) -> Arc<dyn SecurityChain> {
        push(&self.journal, "security-factory:create");
        Arc::new(RecordingChain {
            id: "security-plan".to_string(),
            journal: self.journal.clone(),
            behaviors: self.behaviors.clone(),
        })
    }
}

pub struct RecordingManager {
    name: &'static str,
    journal: Journal,
}

#[async_trait]
impl PolicyManager for RecordingManager {
    async fn start(&self) -> eyre::Result<()> {
        push(&self.journal, format!("{}:start", self.name));
        Ok(())
    }
    async fn pre_stop(&self) -> eyre::Result<()> {
        push(&self.journal, format!("{}:pre-stop", self.name));
        Ok(())
    }
    async fn stop(&self) -> eyre::Result<()> {
        push(&self.journal, format!("{}:stop", self.name));
        Ok(())
    }
}

#[async_trait]
impl ResourceLifecycleManager for RecordingManager {
    async fn start(&self) -> eyre::Result<()> {
        push(&self.journal, format!("{}:start", self.name));
        Ok(())
    }
    async fn pre_stop(&self) -> eyre::Result<()> {
        push(&self.journal, format!("{}:pre-stop", self.name));
        Ok(())
    }
    async fn stop(&self) -> eyre::Result<()> {
        push(&self.journal, format!("{}:stop", self.name));
        Ok(())
    }
}

struct RecordingService {
    name: String,
    fails_to_start: bool,
    journal: Journal,
}

#[async_trait]
impl ApiService for RecordingService {
    fn id(&self) -> &str {
        &self.name
    }
    async fn start(&self) -> eyre::Result<()> {
        push(&self.journal, format!("service:{}:start", self.name));
        if self.fails_to_start {
            eyre::bail!("{} could not start", self.name);
        }
        Ok(())
    }
    async fn stop(&self) -> eyre::Result<()> {
        push(&self.journal, format!("service:{}:stop", self.name));
        Ok(())
    }
}

struct RecordingServiceFactory {
    name: &'static str,
    fails_to_start: bool,
    journal: Journal,
}

impl ApiServiceFactory for RecordingServiceFactory {
    fn create(&self, _api: &ApiDefinition) -> Option<Arc<dyn ApiService>> {
        Some(Arc::new(RecordingService {
            name: self.name.to_string(),
            fails_to_start: self.fails_to_start,
            journal: self.journal.clone(),
        }))
    }
}

type ObservedReactor = Arc<OnceLock<Weak<dyn ApiReactor>>>;

pub struct RecordingConnector {
    journal: Journal,
    accepts: bool,
    on_request: Option<fn(&mut RequestContext)>,
    reactor: ObservedReactor,
    stop_states: Arc<Mutex<Vec<LifecycleState>>>,
}

impl RecordingConnector {
    /// Remember the reactor state seen by a stop callback.
    fn observe_state(&self) {
        if let Some(reactor) = self.reactor.get().and_then(Weak::upgrade) {
            self.stop_states.lock().unwrap().push(reactor.state());
        }
    }
}

#[async_trait]
impl EntrypointConnector for RecordingConnector {
    fn id(&self) -> &str {
        "http-proxy"
    }
    fn matches(&self, _ctx: &RequestContext) -> bool {
        self.accepts
    }
    async fn handle_request(&self, ctx: &mut RequestContext) -> StageResult {
        push(&self.journal, "entrypoint:request");
        if let Some(apply) = self.on_request {
            apply(ctx);
        }
        Ok(())
    }
    async fn handle_response(&self, ctx: &mut RequestContext) -> StageResult {
        push(&self.journal, "entrypoint:response");
        ctx.response
            .headers
            .insert("x-entrypoint", http::HeaderValue::from_static("http-proxy"));
        Ok(())
    }
    async fn pre_stop(&self) -> eyre::Result<()> {
        push(&self.journal, "entrypoint:pre-stop");
        self.observe_state();
        Ok(())
    }
    async fn stop(&self) -> eyre::Result<()> {
        push(&self.journal, "entrypoint:stop");
        self.observe_state();
        Ok(())
    }
}

/// Backend endpoint description.
#[derive(Clone)]
pub struct EndpointScript {
    pub name: &'static str,
    pub delay: Duration,
    pub fail: bool,
}

impl EndpointScript {
    pub fn ok(name: &'static str) -> Self {
        Self {
            name,
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub fn slow(name: &'static str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::ok(name)
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            fail: true,
            ..Self::ok(name)
        }
    }
}

pub struct TestEndpoint {
    spec: EndpointScript,
    journal: Journal,
    pub calls: AtomicUsize,
}

#[async_trait]
impl EndpointConnector for TestEndpoint {
    fn name(&self) -> &str {
        self.spec.name
    }

    async fn connect(&self, ctx: &mut RequestContext) -> StageResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        push(&self.journal, format!("endpoint:{}", self.spec.name));
        if !self.spec.delay.is_zero() {
            tokio::time::sleep(self.spec.delay).await;
        }
        if self.spec.fail {
            return Err(ExecutionError::unexpected(format!(
                "{} refused the connection",
                self.spec.name
            )));
        }
        ctx.response.status = StatusCode::OK;
        ctx.response.body = Bytes::from(self.spec.name);
        Ok(())
    }
}

/// Round-robin endpoint manager.
pub struct TestEndpoints {
    endpoints: Vec<Arc<TestEndpoint>>,
    cursor: AtomicUsize,
    journal: Journal,
}

impl TestEndpoints {
    pub fn calls(&self, name: &str) -> usize {
        self.endpoints
            .iter()
            .filter(|endpoint| endpoint.spec.name == name)
            .map(|endpoint| endpoint.calls.load(Ordering::SeqCst))
            .sum()
    }
}

#[async_trait]
impl EndpointManager for TestEndpoints {
    fn next(&self, _ctx: &RequestContext) -> Option<Arc<dyn EndpointConnector>> {
        if self.endpoints.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % self.endpoints.len();
        Some(self.endpoints[index].clone())
    }
    async fn start(&self) -> eyre::Result<()> {
        push(&self.journal, "endpoint-manager:start");
        Ok(())
    }
    async fn pre_stop(&self) -> eyre::Result<()> {
        push(&self.journal, "endpoint-manager:pre-stop");
        Ok(())
    }
    async fn stop(&self) -> eyre::Result<()> {
        push(&self.journal, "endpoint-manager:stop");
        Ok(())
    }
}

struct RecordingSpan {
    name: String,
    journal: Journal,
}

impl TraceSpan for RecordingSpan {
    fn record_error(&mut self, _error: &str) {
        push(&self.journal, format!("span:{}:error", self.name));
    }
    fn end(&mut self) {
        push(&self.journal, format!("span:{}:end", self.name));
    }
}

pub struct RecordingTracer {
    journal: Journal,
}

#[async_trait]
impl Tracer for RecordingTracer {
    fn enabled(&self) -> bool {
        true
    }
    fn start_span(&self, name: &str, _request_id: &str) -> Box<dyn TraceSpan> {
        push(&self.journal, format!("span:{name}:start"));
        Box::new(RecordingSpan {
            name: name.to_string(),
            journal: self.journal.clone(),
        })
    }
    async fn start(&self) -> eyre::Result<()> {
        push(&self.journal, "tracer:start");
        Ok(())
    }
    async fn stop(&self) -> eyre::Result<()> {
        push(&self.journal, "tracer:stop");
        Ok(())
    }
}

#[derive(Default)]
pub struct CapturingTransport {
    sent: Mutex<Vec<GatewayResponse>>,
}

#[async_trait]
impl ResponseTransport for CapturingTransport {
    async fn send(&self, response: &GatewayResponse) -> eyre::Result<()> {
        self.sent.lock().unwrap().push(response.clone());
        Ok(())
    }
}

pub fn http_api() -> ApiDefinition {
    ApiDefinition {
        id: "api-1".to_string(),
        name: "Echo".to_string(),
        version: "1.0".to_string(),
        organization_id: "DEFAULT".to_string(),
        environment_id: "DEFAULT".to_string(),
        listeners: vec![Listener::Http(HttpListener {
            paths: vec![ListenerPath {
                host: None,
                path: "/echo".to_string(),
            }],
            ..Default::default()
        })],
        ..Default::default()
    }
}

pub fn tcp_api() -> ApiDefinition {
    ApiDefinition {
        id: "tcp-1".to_string(),
        name: "Raw".to_string(),
        environment_id: "DEFAULT".to_string(),
        listeners: vec![Listener::Tcp(TcpListener {
            hosts: vec!["tcp.example.com".to_string(), "tcp2.example.com".to_string()],
            ..Default::default()
        })],
        ..Default::default()
    }
}

pub struct Setup {
    pub api: ApiDefinition,
    pub config: ReactorConfig,
    pub behaviors: HashMap<String, Behavior>,
    pub endpoints: Vec<EndpointScript>,
    pub connector_accepts: bool,
    pub on_entrypoint_request: Option<fn(&mut RequestContext)>,
    pub node_started: bool,
    pub services: Vec<&'static str>,
    /// Services among `services` whose start fails.
    pub failing_services: Vec<&'static str>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            api: http_api(),
            config: ReactorConfig::default(),
            behaviors: HashMap::new(),
            endpoints: vec![EndpointScript::ok("backend")],
            connector_accepts: true,
            on_entrypoint_request: None,
            node_started: true,
            services: Vec::new(),
            failing_services: Vec::new(),
        }
    }
}

impl Setup {
    pub fn behave(mut self, key: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(key.to_string(), behavior);
        self
    }

    pub fn build(self) -> Harness {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let behaviors: Behaviors = Arc::new(self.behaviors);
        let chain = |id: &str| RecordingChain {
            id: id.to_string(),
            journal: journal.clone(),
            behaviors: behaviors.clone(),
        };

        let endpoints = Arc::new(TestEndpoints {
            endpoints: self
                .endpoints
                .into_iter()
                .map(|spec| {
                    Arc::new(TestEndpoint {
                        spec,
                        journal: journal.clone(),
                        calls: AtomicUsize::new(0),
                    })
                })
                .collect(),
            cursor: AtomicUsize::new(0),
            journal: journal.clone(),
        });
        let observed: ObservedReactor = Arc::new(OnceLock::new());
        let stop_states = Arc::new(Mutex::new(Vec::new()));
        let connector: Arc<dyn EntrypointConnector> = Arc::new(RecordingConnector {
            journal: journal.clone(),
            accepts: self.connector_accepts,
            on_request: self.on_entrypoint_request,
            reactor: observed.clone(),
            stop_states: stop_states.clone(),
        });
        let node = Arc::new(NodeState::new(self.node_started));
        let registry = Arc::new(InMemoryAccessPointRegistry::new());
        registry.set_hosts("DEFAULT", vec!["api.company.com".to_string()]);

        let components = ReactorComponents {
            resolver: Arc::new(DefaultEntrypointConnectorResolver::new(vec![connector])),
            endpoint_manager: endpoints.clone(),
            node: node.clone(),
            tracer: Arc::new(RecordingTracer {
                journal: journal.clone(),
            }),
        };
        let policies = PolicyComponents {
            policy_manager: Arc::new(RecordingManager {
                name: "policy-manager",
                journal: journal.clone(),
            }),
            resource_manager: Arc::new(RecordingManager {
                name: "resource-manager",
                journal: journal.clone(),
            }),
            security_chain_factory: Arc::new(RecordingSecurityFactory {
                journal: journal.clone(),
                behaviors: behaviors.clone(),
            }),
            flows: FlowChains {
                organization: Arc::new(chain("organization")),
                plan: Arc::new(chain("plan")),
                api: Arc::new(chain("api")),
            },
            processors: ProcessorChains {
                before_handle: Arc::new(chain("before-handle")),
                before_security: Arc::new(chain("before-security")),
                before_api_execution: Arc::new(chain("before-api-execution")),
                after_api_execution: Arc::new(chain("after-api-execution")),
                on_error: Arc::new(chain("on-error")),
                after_handle: Arc::new(chain("after-handle")),
            },
            service_factories: self
                .services
                .iter()
                .map(|&name| {
                    Arc::new(RecordingServiceFactory {
                        name,
                        fails_to_start: self.failing_services.contains(&name),
                        journal: journal.clone(),
                    }) as Arc<dyn ApiServiceFactory>
                })
                .collect(),
            access_points: registry.clone(),
        };

        let reactor = ReactorFactory::new(self.config).create(self.api, components, policies);
        let _ = observed.set(Arc::downgrade(&reactor));
        Harness {
            reactor,
            journal,
            stop_states,
            transport: Arc::new(CapturingTransport::default()),
            node,
            registry,
            endpoints,
        }
    }
}

pub struct Harness {
    pub reactor: Arc<dyn ApiReactor>,
    pub journal: Journal,
    /// Reactor state seen by the entrypoint's pre-stop and stop callbacks.
    pub stop_states: Arc<Mutex<Vec<LifecycleState>>>,
    pub transport: Arc<CapturingTransport>,
    pub node: Arc<NodeState>,
    pub registry: Arc<InMemoryAccessPointRegistry>,
    pub endpoints: Arc<TestEndpoints>,
}

impl Harness {
    pub fn request(&self, path: &str) -> RequestContext {
        RequestContext::new(
            GatewayRequest::new(Method::GET, Some("api.company.com"), path)
                .with_context_path("/echo"),
            self.transport.clone(),
        )
    }

    pub async fn handle(&self, path: &str) -> RequestContext {
        let ctx = self.request(path);
        self.reactor.clone().handle(ctx).await
    }

    pub fn entries(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.journal.lock().unwrap().clear();
    }

    /// Journal entries recorded while handling requests.
    pub fn pipeline_entries(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|entry| !entry.starts_with("span:"))
            .collect()
    }

    pub fn observed_stop_states(&self) -> Vec<LifecycleState> {
        self.stop_states.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<GatewayResponse> {
        self.transport.sent.lock().unwrap().clone()
    }

    pub fn last_response(&self) -> GatewayResponse {
        self.sent().pop().expect("no response was sent")
    }
}

pub fn config_with_timeout(request_timeout_ms: i64, grace_delay_ms: u64) -> ReactorConfig {
    let mut config = ReactorConfig::default();
    config.request_timeout.request_timeout_ms = request_timeout_ms;
    config.request_timeout.grace_delay_ms = grace_delay_ms;
    config
}

pub fn json_body(response: &GatewayResponse) -> serde_json::Value {
    serde_json::from_slice(&response.body).unwrap()
}
