//! Session repository trait.
//!
//! Defines the interface for session persistence operations.

use super::model::Session;
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// The key of a persisted session: its name and the local directory that
/// holds its record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    pub name: String,
    pub location: PathBuf,
}

impl SessionIdentity {
    pub fn new(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }
}

/// An abstract repository for session checkpoints.
///
/// Implementations must make `save` atomic: a reader never observes a
/// partially written record.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Loads the record stored for `identity`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Session))`: record found
    /// - `Ok(None)`: nothing stored at this location
    /// - `Err(VipError::SessionMismatch)`: the record belongs to another session
    /// - `Err(VipError::CorruptRecord)`: the record could not be decoded
    async fn load(&self, identity: &SessionIdentity) -> Result<Option<Session>>;

    /// Checkpoints a session, replacing any previous record of the same session.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Deletes a record. Succeeds when nothing is stored.
    async fn delete(&self, identity: &SessionIdentity) -> Result<()>;
}
