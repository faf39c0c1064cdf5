//! Mailbox migration engine
//!
//! Moves the messages of each configured mailbox pair from a source IMAP
//! account into a local archive (backup), from the archive into a destination
//! account (restore), or straight from source to destination (migrate).

pub mod engine;
pub mod error;
mod link;
pub mod report;
pub mod retry;
pub mod state;

pub use engine::MigrationEngine;
pub use error::{MigrationError, MigrationResult};
pub use report::{Counts, FailureEntry, MigrationReport, PairReport};
pub use retry::RetryPolicy;
pub use state::{CancellationToken, Mode, PairState};
