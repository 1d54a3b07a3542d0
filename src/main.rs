use std::{path::Path, sync::Arc};

use axon_reactor::{
    adapters::{
        DefaultEntrypointConnectorResolver, InMemoryAccessPointRegistry, NoEndpoints, NodeState,
        TracingTracer, noop::noop_policies,
    },
    config::{
        ApiDefinitionValidator, ReactorConfig, ReactorConfigValidator,
        load_api_definition, load_reactor_config,
    },
    core::{Acceptor, AcceptorHost, ReactorComponents, ReactorFactory},
    metrics, tracing_setup,
};
use clap::Parser;
use color_eyre::{Result, eyre::Context};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
    /// Log filter, e.g. "info" or "axon_reactor=debug"
    #[clap(long, global = true)]
    log_level: Option<String>,
    /// Emit JSON logs instead of the console format
    #[clap(long, global = true)]
    json_logs: bool,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate an API definition, and optionally the reactor configuration
    Validate {
        /// API definition to validate
        #[clap(short, long)]
        api: String,
        /// Reactor configuration to validate
        #[clap(short, long)]
        config: Option<String>,
    },
    /// Print the acceptors a reactor would publish for an API definition
    Acceptors {
        /// API definition
        #[clap(short, long)]
        api: String,
        /// Access point host of the API's environment (repeatable)
        #[clap(long = "access-point")]
        access_points: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    match (&args.log_level, args.json_logs) {
        (Some(level), json) => tracing_setup::init_tracing_with_config(level, json, true)?,
        (None, true) => tracing_setup::init_tracing()?,
        (None, false) => tracing_setup::init_console_tracing()?,
    }
    metrics::init_metrics()?;

    match args.command {
        Commands::Validate { api, config } => validate_command(&api, config.as_deref()),
        Commands::Acceptors { api, access_points } => {
            acceptors_command(&api, access_points).await
        }
    }
}

/// Validate files and exit
fn validate_command(api_path: &str, config_path: Option<&str>) -> Result<()> {
    println!("🔍 Validating API definition: {api_path}");
    let api = load_or_exit(api_path, |path| load_api_definition(path));

    if let Err(e) = ApiDefinitionValidator::validate(&api) {
        eprintln!("❌ API definition validation failed:");
        eprintln!("{e}");
        println!();
        println!("💡 Common fixes:");
        println!("   • Ensure listener paths start with '/'");
        println!("   • Declare hosts without protocol (e.g. 'api.example.com')");
        println!("   • Avoid declaring the same host and path twice");
        std::process::exit(1);
    }
    println!("✅ API definition validation: OK");

    let config = match config_path {
        Some(path) => {
            println!("🔍 Validating reactor configuration: {path}");
            let config = load_or_exit(path, |path| load_reactor_config(path));
            if let Err(e) = ReactorConfigValidator::validate(&config) {
                eprintln!("❌ Reactor configuration validation failed:");
                eprintln!("{e}");
                std::process::exit(1);
            }
            println!("✅ Reactor configuration validation: OK");
            config
        }
        None => ReactorConfig::default(),
    };

    println!();
    println!("📋 Summary:");
    println!("   • API: {} ({}) v{}", api.name, api.id, api.version);
    println!("   • Type: {}", api.api_type.label());
    println!("   • Listeners: {}", api.listeners.len());
    println!(
        "   • Reactor: {}",
        if api.is_tcp_only() { "stream" } else { "proxy" }
    );
    println!("   • Failover: {}", api.failover_enabled());
    if config.request_timeout.is_enabled() {
        println!(
            "   • Request timeout: {}ms (grace {}ms)",
            config.request_timeout.request_timeout_ms, config.request_timeout.grace_delay_ms
        );
    } else {
        println!("   • Request timeout: disabled");
    }
    println!(
        "   • Drain timeout: {}ms",
        config.pending_requests_timeout_ms
    );
    println!();
    println!("🎉 Definition is valid and ready to deploy!");
    Ok(())
}

async fn acceptors_command(api_path: &str, access_points: Vec<String>) -> Result<()> {
    let api = load_api_definition(api_path)
        .wrap_err_with(|| format!("Failed to load API definition from {api_path}"))?;

    let registry = Arc::new(InMemoryAccessPointRegistry::new());
    registry.set_hosts(&api.environment_id, access_points);

    let components = ReactorComponents {
        resolver: Arc::new(DefaultEntrypointConnectorResolver::new(Vec::new())),
        endpoint_manager: Arc::new(NoEndpoints),
        node: Arc::new(NodeState::new(false)),
        tracer: Arc::new(TracingTracer::new(api.id.clone())),
    };
    let reactor = ReactorFactory::new(ReactorConfig::default()).create(
        api,
        components,
        noop_policies(registry),
    );

    let acceptors = reactor.acceptors();
    println!(
        "📋 {} acceptor(s) for API {}:",
        acceptors.len(),
        reactor.id()
    );
    for acceptor in &acceptors {
        println!("   • {}", describe(acceptor));
    }
    Ok(())
}

fn describe(acceptor: &Acceptor) -> String {
    let servers = match acceptor.server_ids() {
        [] => String::new(),
        ids => format!(" [servers: {}]", ids.join(", ")),
    };
    match acceptor {
        Acceptor::Http(http) => {
            let hosts = http.host().hosts();
            let host = match (http.host(), hosts.as_slice()) {
                (AcceptorHost::Dynamic { .. }, []) => "*".to_string(),
                (AcceptorHost::Dynamic { .. }, hosts) => format!("{} (access points)", hosts.join("|")),
                (AcceptorHost::Static(host), _) => host.clone(),
            };
            format!("http {}{}{}", host, http.path(), servers)
        }
        Acceptor::Tcp(tcp) => format!("tcp {}{}", tcp.host(), servers),
    }
}

fn load_or_exit<T>(path: &str, load: impl FnOnce(&Path) -> Result<T>) -> T {
    if !Path::new(path).exists() {
        eprintln!("❌ Error: file '{path}' not found");
        std::process::exit(1);
    }
    match load(Path::new(path)) {
        Ok(value) => {
            println!("✅ Parsing: OK");
            value
        }
        Err(e) => {
            eprintln!("❌ Parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    }
}
