//! Session record DTO.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vip_core::session::Session;

/// Current version of the on-disk session record.
pub const SESSION_RECORD_VERSION: u32 = 1;

/// The JSON document stored as `session_data.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub format_version: u32,
    pub saved_at: DateTime<Utc>,
    pub session: Session,
}

impl SessionRecord {
    pub fn from_domain(session: &Session) -> Self {
        Self {
            format_version: SESSION_RECORD_VERSION,
            saved_at: Utc::now(),
            session: session.clone(),
        }
    }

    /// Converts the record back into the domain model.
    ///
    /// Fails with a message when the record was written by an unknown format.
    pub fn into_domain(self) -> Result<Session, String> {
        if self.format_version != SESSION_RECORD_VERSION {
            return Err(format!(
                "unsupported format_version {} (expected {})",
                self.format_version, SESSION_RECORD_VERSION
            ));
        }
        Ok(self.session)
    }

    pub fn session_name(&self) -> &str {
        self.session.name()
    }
}
