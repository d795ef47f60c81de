//! Session domain module.
//!
//! # Module Structure
//!
//! - `model`: the session state (`Session`) and its set-once properties
//! - `repository`: repository trait for session checkpoints

mod model;
mod repository;

pub use model::{Session, SessionProperty, SessionValue};
pub use repository::{SessionIdentity, SessionRepository};
