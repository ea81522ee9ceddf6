use futures_util::stream::BoxStream;

pub mod anthropic;

use crate::core::entities::{Completion, StreamEvent, UpstreamRequest};
use crate::error::RelayError;

#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Calls the upstream exactly once. `req.stream` selects the response variant.
    async fn invoke(&self, req: UpstreamRequest) -> Result<ConnectorResponse, RelayError>;
}

pub enum ConnectorResponse {
    /// Owns the upstream session; dropping it closes the connection.
    Streaming(BoxStream<'static, StreamEvent>),
    NonStreaming(Completion),
}

impl std::fmt::Debug for ConnectorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectorResponse::Streaming(_) => f.write_str("Streaming(..)"),
            ConnectorResponse::NonStreaming(c) => f.debug_tuple("NonStreaming").field(c).finish(),
        }
    }
}
