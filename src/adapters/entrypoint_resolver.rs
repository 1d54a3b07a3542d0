use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;

use crate::{
    core::context::RequestContext,
    ports::{EntrypointConnector, EntrypointConnectorResolver},
};

/// Resolves the highest priority connector accepting the request.
pub struct DefaultEntrypointConnectorResolver {
    connectors: Vec<Arc<dyn EntrypointConnector>>,
}

impl DefaultEntrypointConnectorResolver {
    pub fn new(mut connectors: Vec<Arc<dyn EntrypointConnector>>) -> Self {
        // Stable sort keeps declaration order among equal priorities.
        connectors.sort_by_key(|connector| std::cmp::Reverse(connector.priority()));
        Self { connectors }
    }

    pub fn connectors(&self) -> &[Arc<dyn EntrypointConnector>] {
        &self.connectors
    }
}

#[async_trait]
impl EntrypointConnectorResolver for DefaultEntrypointConnectorResolver {
    fn resolve(&self, ctx: &RequestContext) -> Option<Arc<dyn EntrypointConnector>> {
        self.connectors
            .iter()
            .find(|connector| connector.matches(ctx))
            .cloned()
    }

    async fn pre_stop(&self) -> Result<()> {
        let mut first_error = None;
        for connector in &self.connectors {
            if let Err(e) = connector.pre_stop().await {
                tracing::warn!("Entrypoint {} pre-stop failed: {:#}", connector.id(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn stop(&self) -> Result<()> {
        let mut first_error = None;
        for connector in &self.connectors {
            if let Err(e) = connector.stop().await {
                tracing::warn!("Entrypoint {} stop failed: {:#}", connector.id(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
