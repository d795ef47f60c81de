pub mod config_service;
pub mod dto;
pub mod json_session_repository;
pub mod memory_gateway;
pub mod paths;
pub mod storage;

pub use crate::config_service::ConfigService;
pub use crate::json_session_repository::{JsonSessionRepository, SESSION_FILE_NAME};
pub use crate::memory_gateway::{GatewayCounters, InMemoryGateway};
pub use crate::paths::VipPaths;
