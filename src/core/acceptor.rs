//! Routing descriptors published by reactors.
//!
//! An external router asks every acceptor whether it takes an inbound
//! connection and hands the request to the owning reactor. Acceptors hold a
//! weak reference so a router never keeps an undeployed reactor alive.
use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    config::{ApiDefinition, validation::normalize_path},
    core::reactor::ApiReactor,
    ports::AccessPointRegistry,
};

/// Where an HTTP acceptor's host comes from.
#[derive(Clone)]
pub enum AcceptorHost {
    /// Declared on the listener path.
    Static(String),
    /// Read from the environment's access points at match time.
    Dynamic {
        environment_id: String,
        registry: Arc<dyn AccessPointRegistry>,
    },
}

impl AcceptorHost {
    /// Current host names. Empty means any host.
    pub fn hosts(&self) -> Vec<String> {
        match self {
            Self::Static(host) => vec![host.clone()],
            Self::Dynamic {
                environment_id,
                registry,
            } => registry.hosts(environment_id),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic { .. })
    }
}

impl fmt::Debug for AcceptorHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(host) => f.debug_tuple("Static").field(host).finish(),
            Self::Dynamic { environment_id, .. } => f
                .debug_struct("Dynamic")
                .field("environment_id", environment_id)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Clone)]
pub struct HttpAcceptor {
    host: AcceptorHost,
    path: String,
    server_ids: Vec<String>,
    reactor: Weak<dyn ApiReactor>,
}

impl HttpAcceptor {
    pub fn new(
        host: AcceptorHost,
        path: &str,
        server_ids: Vec<String>,
        reactor: Weak<dyn ApiReactor>,
    ) -> Self {
        Self {
            host,
            path: normalize_path(path),
            server_ids,
            reactor,
        }
    }

    pub fn host(&self) -> &AcceptorHost {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn accepts(&self, host: Option<&str>, path: &str, server_id: Option<&str>) -> bool {
        server_matches(&self.server_ids, server_id)
            && host_matches(&self.host.hosts(), host)
            && path_matches(&self.path, path)
    }
}

#[derive(Clone)]
pub struct TcpAcceptor {
    host: String,
    server_ids: Vec<String>,
    reactor: Weak<dyn ApiReactor>,
}

impl TcpAcceptor {
    pub fn new(host: &str, server_ids: Vec<String>, reactor: Weak<dyn ApiReactor>) -> Self {
        Self {
            host: host.to_string(),
            server_ids,
            reactor,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Matches on the TLS SNI server name.
    pub fn accepts(&self, sni: Option<&str>, server_id: Option<&str>) -> bool {
        server_matches(&self.server_ids, server_id)
            && sni.is_some_and(|sni| sni.eq_ignore_ascii_case(&self.host))
    }
}

/// Routing descriptor pointing at one reactor.
#[derive(Clone)]
pub enum Acceptor {
    Http(HttpAcceptor),
    Tcp(TcpAcceptor),
}

impl Acceptor {
    /// The owning reactor, if it is still deployed.
    pub fn reactor(&self) -> Option<Arc<dyn ApiReactor>> {
        match self {
            Self::Http(acceptor) => acceptor.reactor.upgrade(),
            Self::Tcp(acceptor) => acceptor.reactor.upgrade(),
        }
    }

    pub fn server_ids(&self) -> &[String] {
        match self {
            Self::Http(acceptor) => &acceptor.server_ids,
            Self::Tcp(acceptor) => &acceptor.server_ids,
        }
    }
}

impl fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(acceptor) => f
                .debug_struct("HttpAcceptor")
                .field("host", &acceptor.host)
                .field("path", &acceptor.path)
                .field("server_ids", &acceptor.server_ids)
                .finish(),
            Self::Tcp(acceptor) => f
                .debug_struct("TcpAcceptor")
                .field("host", &acceptor.host)
                .field("server_ids", &acceptor.server_ids)
                .finish(),
        }
    }
}

impl fmt::Display for Acceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(acceptor) => match &acceptor.host {
                AcceptorHost::Static(host) => write!(f, "http {}{}", host, acceptor.path),
                AcceptorHost::Dynamic { environment_id, .. } => write!(
                    f,
                    "http <access-points:{}>{}",
                    environment_id, acceptor.path
                ),
            },
            Self::Tcp(acceptor) => write!(f, "tcp {}", acceptor.host),
        }
    }
}

/// One acceptor per path of every HTTP listener. Paths without a host
/// resolve their host from the environment's access points.
pub fn http_acceptors(
    api: &ApiDefinition,
    reactor: &Weak<dyn ApiReactor>,
    registry: &Arc<dyn AccessPointRegistry>,
) -> Vec<Acceptor> {
    api.http_listeners()
        .flat_map(|listener| {
            listener.paths.iter().map(move |path| {
                let host = match &path.host {
                    Some(host) => AcceptorHost::Static(host.clone()),
                    None => AcceptorHost::Dynamic {
                        environment_id: api.environment_id.clone(),
                        registry: registry.clone(),
                    },
                };
                Acceptor::Http(HttpAcceptor::new(
                    host,
                    &path.path,
                    listener.servers.clone(),
                    reactor.clone(),
                ))
            })
        })
        .collect()
}

/// One acceptor per declared host of every TCP listener.
pub fn tcp_acceptors(api: &ApiDefinition, reactor: &Weak<dyn ApiReactor>) -> Vec<Acceptor> {
    api.tcp_listeners()
        .flat_map(|listener| {
            listener.hosts.iter().map(move |host| {
                Acceptor::Tcp(TcpAcceptor::new(
                    host,
                    listener.servers.clone(),
                    reactor.clone(),
                ))
            })
        })
        .collect()
}

fn server_matches(server_ids: &[String], server_id: Option<&str>) -> bool {
    server_ids.is_empty() || server_id.is_some_and(|id| server_ids.iter().any(|s| s == id))
}

fn host_matches(hosts: &[String], host: Option<&str>) -> bool {
    if hosts.is_empty() {
        return true;
    }
    let Some(host) = host else {
        return false;
    };
    let host = strip_port(host);
    hosts
        .iter()
        .any(|candidate| strip_port(candidate).eq_ignore_ascii_case(host))
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Prefix match on whole path segments.
fn path_matches(acceptor_path: &str, request_path: &str) -> bool {
    if acceptor_path == "/" {
        return true;
    }
    let request_path = normalize_path(request_path);
    match request_path.strip_prefix(acceptor_path) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
