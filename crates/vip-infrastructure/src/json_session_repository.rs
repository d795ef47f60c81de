//! JSON-based SessionRepository implementation.

use crate::dto::SessionRecord;
use crate::storage::AtomicFile;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use vip_core::error::{Result, VipError};
use vip_core::session::{Session, SessionIdentity, SessionRepository};

/// File name of the checkpoint inside a session's local output directory.
pub const SESSION_FILE_NAME: &str = "session_data.json";

/// Stores each session as `<local_output_location>/session_data.json`.
///
/// The record lives next to the downloaded results, so moving an output
/// directory moves its session with it.
#[derive(Debug, Clone, Default)]
pub struct JsonSessionRepository;

impl JsonSessionRepository {
    pub fn new() -> Self {
        Self
    }

    pub fn record_path(location: &Path) -> PathBuf {
        location.join(SESSION_FILE_NAME)
    }

    fn file(location: &Path) -> AtomicFile<SessionRecord> {
        AtomicFile::json(Self::record_path(location))
    }
}

fn corrupt(path: &Path, err: VipError) -> VipError {
    match err {
        VipError::Serialization { message, .. } => VipError::CorruptRecord {
            path: path.display().to_string(),
            message,
        },
        other => other,
    }
}

fn mismatch(path: &Path, expected: &str, found: &str) -> VipError {
    VipError::SessionMismatch {
        path: path.display().to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

#[async_trait]
impl SessionRepository for JsonSessionRepository {
    async fn load(&self, identity: &SessionIdentity) -> Result<Option<Session>> {
        let file = Self::file(identity.location());
        let path = file.path().to_path_buf();

        let Some(record) = file.load().map_err(|e| corrupt(&path, e))? else {
            tracing::debug!("No session record at {}", path.display());
            return Ok(None);
        };

        if record.session_name() != identity.name {
            return Err(mismatch(&path, &identity.name, record.session_name()));
        }

        let mut session = record.into_domain().map_err(|message| VipError::CorruptRecord {
            path: path.display().to_string(),
            message,
        })?;
        session.mark_clean();

        tracing::info!(
            "Session '{}' loaded from {} ({} workflow(s))",
            session.name(),
            path.display(),
            session.workflows().len()
        );
        Ok(Some(session))
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let identity = session.identity()?;
        let file = Self::file(identity.location());
        let path = file.path().to_path_buf();

        file.update(|existing| {
            if let Some(existing) = existing {
                if existing.session_name() != session.name() {
                    return Err(mismatch(&path, session.name(), existing.session_name()));
                }
            }
            Ok(SessionRecord::from_domain(session))
        })
        .map_err(|e| corrupt(&path, e))?;

        tracing::debug!("Session '{}' saved to {}", session.name(), path.display());
        Ok(())
    }

    async fn delete(&self, identity: &SessionIdentity) -> Result<()> {
        Self::file(identity.location()).remove()
    }
}
