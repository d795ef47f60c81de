pub mod config;
pub mod error;
pub mod gateway;
pub mod input;
pub mod remote_path;
pub mod session;
pub mod workflow;

// Re-export common types
pub use config::VipConfig;
pub use error::{Result, VipError};
pub use gateway::RemoteGateway;
pub use input::{InputSettings, InputValue, JobParameters};
pub use remote_path::RemotePath;
pub use session::{Session, SessionIdentity, SessionProperty, SessionRepository, SessionValue};
pub use workflow::{OutputDescriptor, WorkflowRecord, WorkflowStatus, WorkflowUpdate};
