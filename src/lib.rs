pub mod accounts;
pub mod archive;
pub mod catalog;
pub mod checkpoint;
pub mod cli;
pub mod codec;
pub mod config;
pub mod imap;
pub mod logging;
pub mod migration;

pub use accounts::{Account, CredentialTable, MailboxPair};
pub use catalog::{FolderNode, FolderTree};
pub use config::MigratorConfig;
pub use migration::{MigrationEngine, MigrationError, MigrationReport, Mode, PairState};
