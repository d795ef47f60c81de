use std::sync::Arc;
use vip_core::config::VipConfig;
use vip_core::gateway::RemoteGateway;
use vip_core::session::SessionRepository;
use vip_infrastructure::{ConfigService, JsonSessionRepository};

/// Collaborators shared by every session of a process.
///
/// The configuration is captured here once and never read from globals.
#[derive(Clone)]
pub struct SessionContext {
    pub gateway: Arc<dyn RemoteGateway>,
    pub repository: Arc<dyn SessionRepository>,
    pub config: VipConfig,
}

impl SessionContext {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        repository: Arc<dyn SessionRepository>,
        config: VipConfig,
    ) -> Self {
        Self {
            gateway,
            repository,
            config,
        }
    }

    /// A context persisting sessions as JSON records next to their outputs.
    pub fn with_json_records(gateway: Arc<dyn RemoteGateway>, config: VipConfig) -> Self {
        Self::new(gateway, Arc::new(JsonSessionRepository::new()), config)
    }

    /// Like [`with_json_records`](Self::with_json_records), with the
    /// configuration read through `config_service`.
    pub fn from_config_service(
        gateway: Arc<dyn RemoteGateway>,
        config_service: &ConfigService,
    ) -> vip_core::Result<Self> {
        Ok(Self::with_json_records(gateway, config_service.get_config()?))
    }
}
