//! Application layer for the VIP client.
//!
//! [`VipSession`] drives one session through its lifecycle, coordinating
//! the domain model, the execution layer and persistence.

pub mod context;
pub mod settings;
pub mod vip_session;

pub use context::SessionContext;
pub use settings::SessionSettings;
pub use vip_session::{DownloadOptions, VipSession};
