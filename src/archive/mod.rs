/// Archive lifecycle
///
/// An archive moves `created -> submitted -> stored -> processing -> processed`,
/// and can be moved to `invalid` from any state with a structured error.
/// State lives in the relational store; [`ArchiveStore`] enforces the
/// transition table on every write.

mod store;

pub use store::{ArchiveChanges, ArchiveStore, NewArchive};

use crate::error::{AppError, ArchiveError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveStatus {
    Created,
    Submitted,
    Stored,
    Processing,
    Processed,
    Invalid,
}

impl ArchiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveStatus::Created => "created",
            ArchiveStatus::Submitted => "submitted",
            ArchiveStatus::Stored => "stored",
            ArchiveStatus::Processing => "processing",
            ArchiveStatus::Processed => "processed",
            ArchiveStatus::Invalid => "invalid",
        }
    }

    /// Terminal archives no longer count against the one-active-archive limit
    pub fn is_terminal(&self) -> bool {
        matches!(self, ArchiveStatus::Processed | ArchiveStatus::Invalid)
    }

    pub fn can_transition_to(&self, next: ArchiveStatus) -> bool {
        use ArchiveStatus::*;
        match (self, next) {
            (Invalid, _) => false,
            (_, Invalid) => true,
            (Created, Submitted) => true,
            (Submitted, Stored) => true,
            (Stored, Processing) => true,
            (Processing, Processed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ArchiveStatus::Created),
            "submitted" => Ok(ArchiveStatus::Submitted),
            "stored" => Ok(ArchiveStatus::Stored),
            "processing" => Ok(ArchiveStatus::Processing),
            "processed" => Ok(ArchiveStatus::Processed),
            "invalid" => Ok(ArchiveStatus::Invalid),
            other => Err(AppError::Internal(format!("Unknown archive status: {}", other))),
        }
    }
}

/// Archive record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Archive {
    pub id: Uuid,
    pub account_number: String,
    pub archive_type: String,
    pub source_url: Option<String>,
    pub blob_key: Option<String>,
    pub status: ArchiveStatus,
    /// Hex SHA-512 of the archive bytes
    pub fingerprint: Option<String>,
    pub analysis_task_id: Option<String>,
    pub error: Option<ArchiveError>,
    /// Time range the archive claims to cover
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Blob key for an archive file
pub fn archive_blob_key(account: &str, archive_type: &str, archive_id: Uuid, filename: &str) -> String {
    format!("{}/{}/archives/{}/{}", account, archive_type, archive_id, filename)
}

/// Blob key for a media file extracted from an archive
pub fn media_blob_key(account: &str, archive_type: &str, archive_id: Uuid, uri: &str) -> String {
    format!(
        "{}/{}/archives/{}/data/{}",
        account,
        archive_type,
        archive_id,
        uri.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ArchiveStatus::*;

    const ALL: [ArchiveStatus; 6] = [Created, Submitted, Stored, Processing, Processed, Invalid];

    #[test]
    fn test_happy_path_transitions() {
        assert!(Created.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Stored));
        assert!(Stored.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processed));
    }

    #[test]
    fn test_no_skipping_states() {
        assert!(!Created.can_transition_to(Stored));
        assert!(!Submitted.can_transition_to(Processing));
        assert!(!Stored.can_transition_to(Processed));
        assert!(!Processed.can_transition_to(Processing));
    }

    #[test]
    fn test_any_state_can_be_invalidated_once() {
        for status in ALL {
            assert_eq!(status.can_transition_to(Invalid), status != Invalid);
        }
        for status in ALL {
            assert!(!Invalid.can_transition_to(status));
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<ArchiveStatus>().unwrap(), status);
        }
        assert!("archived".parse::<ArchiveStatus>().is_err());
    }

    #[test]
    fn test_blob_keys() {
        let id = Uuid::nil();
        assert_eq!(
            archive_blob_key("acct", "facebook", id, "archive.zip"),
            "acct/facebook/archives/00000000-0000-0000-0000-000000000000/archive.zip"
        );
        assert_eq!(
            media_blob_key("acct", "facebook", id, "photos_and_videos/a.jpg"),
            "acct/facebook/archives/00000000-0000-0000-0000-000000000000/data/photos_and_videos/a.jpg"
        );
    }
}
