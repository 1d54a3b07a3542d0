//! Builds the reactor matching an API definition.
use std::sync::Arc;

use tracing::debug;

use crate::{
    config::{ApiDefinition, ReactorConfig},
    core::reactor::{ApiReactor, PolicyComponents, ProxyReactor, ReactorComponents, StreamReactor},
};

pub struct ReactorFactory {
    config: ReactorConfig,
}

impl ReactorFactory {
    pub fn new(config: ReactorConfig) -> Self {
        Self { config }
    }

    /// APIs reachable only through TCP listeners get the stream reactor;
    /// the policy components are not used in that case.
    pub fn create(
        &self,
        api: ApiDefinition,
        components: ReactorComponents,
        policies: PolicyComponents,
    ) -> Arc<dyn ApiReactor> {
        if api.is_tcp_only() {
            debug!("Creating stream reactor for API {}", api.id);
            StreamReactor::new(api, self.config.clone(), components)
        } else {
            debug!("Creating proxy reactor for API {}", api.id);
            ProxyReactor::new(api, self.config.clone(), components, policies)
        }
    }
}
