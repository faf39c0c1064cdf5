use crate::migration::MigrationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What a run does with each mailbox pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    ListSource,
    ListDestination,
    Backup,
    Restore,
    Migrate,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::ListSource => "list source",
            Mode::ListDestination => "list destination",
            Mode::Backup => "backup",
            Mode::Restore => "restore",
            Mode::Migrate => "migrate",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one mailbox pair within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum PairState {
    NotStarted,
    ConnectingSource,
    ConnectingDestination,
    /// Display path of the folder being transferred
    MigratingFolder(String),
    Completed,
    Errored(MigrationError),
    /// Nothing to do for this pair, with the reason
    Skipped(String),
}

impl PairState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PairState::Completed | PairState::Errored(_) | PairState::Skipped(_)
        )
    }

    /// Allowed edges of the pair lifecycle. Any live state may fail.
    pub fn can_transition_to(&self, next: &PairState) -> bool {
        use PairState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Errored(_)) => true,
            (NotStarted, ConnectingSource) => true,
            (NotStarted, ConnectingDestination) => true,
            (NotStarted, Skipped(_)) => true,
            (ConnectingSource, ConnectingDestination) => true,
            (ConnectingSource, MigratingFolder(_)) => true,
            (ConnectingSource, Completed) => true,
            (ConnectingDestination, MigratingFolder(_)) => true,
            (ConnectingDestination, Completed) => true,
            (MigratingFolder(_), MigratingFolder(_)) => true,
            (MigratingFolder(_), Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairState::NotStarted => write!(f, "not started"),
            PairState::ConnectingSource => write!(f, "connecting to source"),
            PairState::ConnectingDestination => write!(f, "connecting to destination"),
            PairState::MigratingFolder(folder) => write!(f, "migrating {}", folder),
            PairState::Completed => write!(f, "completed"),
            PairState::Errored(error) => write!(f, "errored: {}", error),
            PairState::Skipped(reason) => write!(f, "skipped: {}", reason),
        }
    }
}

/// Cooperative cancellation shared by every pair of a run.
///
/// Checked between units of work; an operation already on the wire finishes
/// and gets checkpointed first.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_lifecycle() {
        let folder = PairState::MigratingFolder("INBOX".into());
        assert!(PairState::NotStarted.can_transition_to(&PairState::ConnectingSource));
        assert!(PairState::ConnectingSource.can_transition_to(&PairState::ConnectingDestination));
        assert!(PairState::ConnectingDestination.can_transition_to(&folder));
        assert!(folder.can_transition_to(&PairState::MigratingFolder("INBOX/Work".into())));
        assert!(folder.can_transition_to(&PairState::Completed));
        assert!(folder.can_transition_to(&PairState::Errored(MigrationError::Cancelled)));

        assert!(!PairState::NotStarted.can_transition_to(&PairState::Completed));
        assert!(!PairState::Completed.can_transition_to(&PairState::ConnectingSource));
        assert!(!PairState::Errored(MigrationError::Cancelled)
            .can_transition_to(&PairState::Completed));
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&PairState::MigratingFolder("INBOX".into())).unwrap();
        assert_eq!(json, r#"{"state":"migrating_folder","detail":"INBOX"}"#);
        let json = serde_json::to_string(&PairState::Completed).unwrap();
        assert_eq!(json, r#"{"state":"completed"}"#);
    }
}
