use std::sync::Arc;

use crate::config::{ChatDefaults, Limits, RelayConfig};
use crate::connectors::{Connector, ConnectorResponse};
use crate::core::entities::{ModelDescriptor, UpstreamRequest};
use crate::error::RelayError;

/// Shared, read-only process state. Built once at startup and cloned into handlers.
#[derive(Clone)]
pub struct AppState {
    connector: Option<Arc<dyn Connector>>,
    models: Arc<Vec<ModelDescriptor>>,
    defaults: Arc<ChatDefaults>,
    limits: Arc<Limits>,
}

impl AppState {
    /// `connector` is `None` when no API key was found at startup.
    pub fn new(config: &RelayConfig, connector: Option<Arc<dyn Connector>>) -> Self {
        Self {
            connector,
            models: Arc::new(config.models.clone()),
            defaults: Arc::new(config.defaults.clone()),
            limits: Arc::new(config.limits.clone()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.connector.is_some()
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn defaults(&self) -> &ChatDefaults {
        &self.defaults
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub async fn invoke(&self, req: UpstreamRequest) -> Result<ConnectorResponse, RelayError> {
        let connector = self.connector.as_ref().ok_or(RelayError::NotConfigured)?;
        tracing::debug!(
            connector = connector.name(),
            model = %req.model,
            messages = req.messages.len(),
            stream = req.stream,
            "invoking upstream"
        );
        connector.invoke(req).await
    }
}
