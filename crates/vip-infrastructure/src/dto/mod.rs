//! Data transfer objects for persistence.

mod session;

pub use session::{SESSION_RECORD_VERSION, SessionRecord};
