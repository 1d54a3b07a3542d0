use async_trait::async_trait;
use eyre::Result;

use crate::core::context::GatewayResponse;

/// Writes the final response back to the client connection.
#[async_trait]
pub trait ResponseTransport: Send + Sync + 'static {
    async fn send(&self, response: &GatewayResponse) -> Result<()>;
}
