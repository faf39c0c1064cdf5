//! Mailbox pairs loaded from the credentials CSV.
//!
//! One row per pair, no header:
//! `old_username, old_password, old_host, old_port, old_ssl,
//!  new_username, new_password, new_host, new_port, new_ssl`

use crate::archive::name_codec;
use crate::imap::ImapConfig;
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ALL_LABELS: &str = "all";
const COLUMNS: usize = 10;

pub type AccountsResult<T> = Result<T, AccountsError>;

#[derive(Error, Debug)]
pub enum AccountsError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid row {line}: {reason}")]
    InvalidRow { line: u64, reason: String },

    #[error("Mailbox {0} is listed more than once")]
    DuplicateLabel(String),

    /// Two labels would share one backup directory and checkpoint
    #[error("Mailboxes {first} and {second} map to the same directory {dir}")]
    LabelCollision {
        first: String,
        second: String,
        dir: String,
    },

    #[error("Mailbox {0} is not configured")]
    UnknownLabel(String),
}

/// One side of a migration
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub use_ssl: bool,
}

impl Account {
    /// Both username and host are needed to connect
    pub fn is_configured(&self) -> bool {
        !self.username.is_empty() && !self.host.is_empty()
    }

    pub fn imap_config(&self, timeout_seconds: u64) -> ImapConfig {
        ImapConfig::new(
            self.host.clone(),
            self.port,
            self.username.clone(),
            self.password.clone(),
        )
        .with_tls(self.use_ssl)
        .with_timeout(timeout_seconds)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("password", &"******")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .finish()
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}:{}", self.username, self.host, self.port)?;
        if self.use_ssl {
            f.write_str(" (ssl)")?;
        }
        Ok(())
    }
}

/// Source and destination account, keyed by the source username
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxPair {
    pub label: String,
    pub source: Account,
    pub destination: Account,
}

impl fmt::Display for MailboxPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.source, self.destination)
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    old_username: String,
    old_password: String,
    old_host: String,
    old_port: Option<String>,
    old_ssl: Option<String>,
    new_username: String,
    new_password: String,
    new_host: String,
    new_port: Option<String>,
    new_ssl: Option<String>,
}

/// Every pair of the credentials file, in file order
#[derive(Debug, Clone, Default)]
pub struct CredentialTable {
    pairs: Vec<MailboxPair>,
}

impl CredentialTable {
    pub fn load<P: AsRef<Path>>(path: P) -> AccountsResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| AccountsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_reader(file)?;
        tracing::debug!("Loaded {} mailbox pairs from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> AccountsResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .quote(b'"')
            .from_reader(reader);

        let mut pairs: Vec<MailboxPair> = Vec::new();
        for result in csv_reader.records() {
            let raw = result?;
            let line = raw.position().map(|p| p.line()).unwrap_or(0);

            let mut fields: Vec<String> = raw.iter().map(normalise_field).collect();
            if fields.len() > COLUMNS {
                return Err(AccountsError::InvalidRow {
                    line,
                    reason: format!("expected {} columns, found {}", COLUMNS, fields.len()),
                });
            }
            fields.resize(COLUMNS, String::new());

            let row: CsvRow = csv::StringRecord::from(fields).deserialize(None)?;
            let pair = row.into_pair(line)?;
            if pairs.iter().any(|p| p.label == pair.label) {
                return Err(AccountsError::DuplicateLabel(pair.label));
            }
            // Compared without case so the table is portable to case-insensitive filesystems
            let dir = name_codec::label_dir(&pair.label);
            if let Some(other) = pairs
                .iter()
                .find(|p| name_codec::label_dir(&p.label).eq_ignore_ascii_case(&dir))
            {
                return Err(AccountsError::LabelCollision {
                    first: other.label.clone(),
                    second: pair.label,
                    dir,
                });
            }
            pairs.push(pair);
        }

        Ok(Self { pairs })
    }

    pub fn pairs(&self) -> &[MailboxPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Pairs named by `labels`, in file order. `all` selects every pair.
    pub fn select(&self, labels: &[String]) -> AccountsResult<Vec<MailboxPair>> {
        if labels.iter().any(|label| label == ALL_LABELS) {
            return Ok(self.pairs.clone());
        }

        if let Some(unknown) = labels
            .iter()
            .find(|label| !self.pairs.iter().any(|p| &p.label == *label))
        {
            return Err(AccountsError::UnknownLabel(unknown.clone()));
        }

        Ok(self
            .pairs
            .iter()
            .filter(|p| labels.contains(&p.label))
            .cloned()
            .collect())
    }
}

impl CsvRow {
    fn into_pair(self, line: u64) -> AccountsResult<MailboxPair> {
        if self.old_username.is_empty() {
            return Err(AccountsError::InvalidRow {
                line,
                reason: "old_username is empty".to_string(),
            });
        }

        let source = account(
            self.old_username,
            self.old_password,
            self.old_host,
            self.old_port,
            self.old_ssl,
            line,
        )?;
        let destination = account(
            self.new_username,
            self.new_password,
            self.new_host,
            self.new_port,
            self.new_ssl,
            line,
        )?;

        Ok(MailboxPair {
            label: source.username.clone(),
            source,
            destination,
        })
    }
}

fn account(
    username: String,
    password: String,
    host: String,
    port: Option<String>,
    ssl: Option<String>,
    line: u64,
) -> AccountsResult<Account> {
    let use_ssl = parse_ssl(ssl.as_deref());
    let port = match port.as_deref().filter(|p| !p.is_empty()) {
        Some(port) => port.parse::<u16>().map_err(|_| AccountsError::InvalidRow {
            line,
            reason: format!("invalid port {:?}", port),
        })?,
        None if use_ssl => 993,
        None => 143,
    };

    Ok(Account {
        username,
        password,
        host,
        port,
        use_ssl,
    })
}

/// Only an explicit `false` turns SSL off
fn parse_ssl(value: Option<&str>) -> bool {
    !matches!(value, Some(v) if v.eq_ignore_ascii_case("false"))
}

/// Leading blanks are not part of a field, and a field that is quoted after
/// such blanks is still a quoted field.
fn normalise_field(raw: &str) -> String {
    let field = raw.trim_start();
    if field.len() != raw.len() && field.len() >= 2 && field.starts_with('"') && field.ends_with('"')
    {
        field[1..field.len() - 1].replace("\"\"", "\"")
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
alice@old.example,secret,imap.old.example,,,alice@new.example,s3cret,imap.new.example,,
bob@old.example,\"pa,ss\", imap.old.example, 143, false, bob@new.example, \"p w\", imap.new.example, 1993, TRUE
carol@old.example,pw,imap.old.example,,FALSE,,,,,
";

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rows_become_pairs() {
        let table = CredentialTable::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(table.len(), 3);

        let alice = &table.pairs()[0];
        assert_eq!(alice.label, "alice@old.example");
        assert_eq!(alice.source.port, 993);
        assert!(alice.source.use_ssl);
        assert_eq!(alice.destination.host, "imap.new.example");

        let bob = &table.pairs()[1];
        assert_eq!(bob.source.password, "pa,ss");
        assert_eq!(bob.source.host, "imap.old.example");
        assert_eq!(bob.source.port, 143);
        assert!(!bob.source.use_ssl);
        assert_eq!(bob.destination.password, "p w");
        assert_eq!(bob.destination.port, 1993);
        assert!(bob.destination.use_ssl);

        let carol = &table.pairs()[2];
        assert!(!carol.source.use_ssl);
        assert_eq!(carol.source.port, 143);
        assert!(!carol.destination.is_configured());
    }

    #[test]
    fn test_select() {
        let table = CredentialTable::from_reader(SAMPLE.as_bytes()).unwrap();

        assert_eq!(table.select(&labels(&["all"])).unwrap().len(), 3);

        let picked = table
            .select(&labels(&["carol@old.example", "alice@old.example"]))
            .unwrap();
        let picked: Vec<&str> = picked.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(picked, vec!["alice@old.example", "carol@old.example"]);

        assert!(matches!(
            table.select(&labels(&["nobody@old.example"])),
            Err(AccountsError::UnknownLabel(label)) if label == "nobody@old.example"
        ));
    }

    #[test]
    fn test_duplicate_label_is_rejected() {
        let csv = "a,p,h,,,b,p,h,,\na,q,h,,,c,p,h,,\n";
        assert!(matches!(
            CredentialTable::from_reader(csv.as_bytes()),
            Err(AccountsError::DuplicateLabel(label)) if label == "a"
        ));
    }

    #[test]
    fn test_labels_sharing_a_directory_are_rejected() {
        let csv = "a@b,p,h,,,x,p,h,,\na_at_b,q,h,,,y,p,h,,\n";
        match CredentialTable::from_reader(csv.as_bytes()) {
            Err(AccountsError::LabelCollision { first, second, dir }) => {
                assert_eq!(first, "a@b");
                assert_eq!(second, "a_at_b");
                assert_eq!(dir, "a_at_b");
            }
            other => panic!("expected a label collision, got {:?}", other.map(|t| t.len())),
        }

        let csv = "Alice,p,h,,,x,p,h,,\nalice,q,h,,,y,p,h,,\n";
        assert!(matches!(
            CredentialTable::from_reader(csv.as_bytes()),
            Err(AccountsError::LabelCollision { .. })
        ));
    }

    #[test]
    fn test_bad_port_is_rejected() {
        let csv = "a,p,h,imap,,b,p,h,,\n";
        assert!(matches!(
            CredentialTable::from_reader(csv.as_bytes()),
            Err(AccountsError::InvalidRow { line: 1, .. })
        ));
    }

    #[test]
    fn test_short_rows_default_missing_columns() {
        let table = CredentialTable::from_reader("a,p,h\n".as_bytes()).unwrap();
        let pair = &table.pairs()[0];
        assert_eq!(pair.source.port, 993);
        assert!(!pair.destination.is_configured());
    }

    #[test]
    fn test_debug_hides_password() {
        let table = CredentialTable::from_reader(SAMPLE.as_bytes()).unwrap();
        let rendered = format!("{:?}", table.pairs()[0]);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("******"));
        assert_eq!(
            table.pairs()[0].to_string(),
            "alice@old.example on imap.old.example:993 (ssl) => alice@new.example on imap.new.example:993 (ssl)"
        );
    }
}
