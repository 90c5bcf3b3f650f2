//! Top-level owner of the resource engine.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{ConfigManager, EngineConfig, NewResource, RemovalTicket};
use crate::error::ResourceResult;
use crate::resources::Resources;
use crate::settings::ResourceId;
use crate::transport::{HttpTransport, Transport};

/// The engine configuration, the config manager and the resource registry,
/// created together and torn down together.
pub struct ResourceEngine {
    config: EngineConfig,
    manager: ConfigManager,
    resources: Resources,
}

impl ResourceEngine {
    /// Open the engine with the default HTTP transport.
    pub fn open(config: EngineConfig) -> ResourceResult<Self> {
        Self::with_transport(config, Arc::new(HttpTransport::new()))
    }

    pub fn with_transport(config: EngineConfig, transport: Arc<dyn Transport>) -> ResourceResult<Self> {
        let manager = ConfigManager::open(&config)?;
        let resources = Resources::new(&config, transport);
        Ok(ResourceEngine {
            config,
            manager,
            resources,
        })
    }

    /// Create and start loading the configured resources.
    pub fn start(&mut self) -> usize {
        self.manager.create_resources(&mut self.resources)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn manager(&self) -> &ConfigManager {
        &self.manager
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut Resources {
        &mut self.resources
    }

    pub fn add_resource(&mut self, new: NewResource) -> ResourceResult<ResourceId> {
        self.manager.add_resource(new, &mut self.resources)
    }

    pub async fn remove_resource(&mut self, id: ResourceId) -> ResourceResult<RemovalTicket> {
        self.manager.remove_resource(id, &mut self.resources).await
    }

    /// Close every resource with a final save, then write the config.
    pub async fn shutdown(mut self) {
        info!(resources = self.resources.len(), "Shutting down");
        self.resources.close_all().await;
        if let Err(e) = self.manager.store().sync() {
            warn!("Failed to write resource config: {}", e);
        }
    }
}
