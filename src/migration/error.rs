use crate::archive::ArchiveError;
use crate::catalog::MappingError;
use crate::checkpoint::CheckpointError;
use crate::codec::EncodingError;
use crate::imap::ImapError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type MigrationResult<T> = Result<T, MigrationError>;

/// What went wrong while moving a mailbox, and how far it reaches.
///
/// `Storage` ends the whole run. The other kinds end at most the pair they
/// occur in; the engine decides whether they stop the pair or are only
/// recorded against one message or folder.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum MigrationError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Folder conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cancelled")]
    Cancelled,
}

impl MigrationError {
    pub fn kind(&self) -> &'static str {
        match self {
            MigrationError::Connection(_) => "connection",
            MigrationError::Protocol(_) => "protocol",
            MigrationError::Encoding(_) => "encoding",
            MigrationError::Conflict(_) => "conflict",
            MigrationError::Storage(_) => "storage",
            MigrationError::Cancelled => "cancelled",
        }
    }

    /// Nothing further can safely run once local state cannot be written
    pub fn is_fatal(&self) -> bool {
        matches!(self, MigrationError::Storage(_))
    }
}

impl From<ImapError> for MigrationError {
    fn from(error: ImapError) -> Self {
        if error.is_connection_error() || error.is_auth_error() {
            MigrationError::Connection(error.to_string())
        } else {
            MigrationError::Protocol(error.to_string())
        }
    }
}

impl From<ArchiveError> for MigrationError {
    fn from(error: ArchiveError) -> Self {
        MigrationError::Storage(error.to_string())
    }
}

impl From<CheckpointError> for MigrationError {
    fn from(error: CheckpointError) -> Self {
        MigrationError::Storage(error.to_string())
    }
}

impl From<EncodingError> for MigrationError {
    fn from(error: EncodingError) -> Self {
        MigrationError::Encoding(error.to_string())
    }
}

impl From<MappingError> for MigrationError {
    fn from(error: MappingError) -> Self {
        MigrationError::Conflict(error.to_string())
    }
}
