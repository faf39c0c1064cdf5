//! Persistent record of what has already been transferred.
//!
//! One SQLite database per `(phase, mailbox label)`. Every record is committed
//! before the call returns. The database is opened in exclusive locking mode
//! and the lock is taken at open, so a second run over the same journal, in
//! this process or another, is refused until the first one closes or exits.

use crate::archive::name_codec;
use crate::catalog::{display_path, FolderPath};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteLockingMode,
    SqliteSynchronous,
};
use sqlx::{Connection, Row};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// How long an open waits for another holder to let go of a journal
const LOCK_WAIT: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint {path} belongs to {found:?}, not {expected:?}")]
    WrongOwner {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Checkpoint {0} is already in use")]
    AlreadyOpen(PathBuf),
}

impl CheckpointError {
    fn io<P: AsRef<Path>>(path: P, source: io::Error) -> Self {
        CheckpointError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// SQLITE_BUSY and SQLITE_LOCKED, including their extended codes
    fn from_open(path: &Path, error: sqlx::Error) -> Self {
        let locked = match &error {
            sqlx::Error::Database(db) => db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| matches!(code & 0xff, 5 | 6))
                .unwrap_or(false),
            _ => false,
        };
        if locked {
            CheckpointError::AlreadyOpen(path.to_path_buf())
        } else {
            CheckpointError::Database(error)
        }
    }
}

/// Which kind of transfer a journal belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Backup,
    Restore,
    Migrate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Backup => "backup",
            Phase::Restore => "restore",
            Phase::Migrate => "migrate",
        })
    }
}

/// Per-folder progress
#[derive(Debug, Default, Clone)]
pub struct FolderProgress {
    migrated: HashSet<String>,
    uid_validity: Option<u32>,
    uids: HashMap<u32, String>,
    failures: Vec<String>,
    done: bool,
}

impl FolderProgress {
    pub fn migrated(&self) -> usize {
        self.migrated.len()
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

fn failure_line(hash: Option<String>, uid: Option<u32>, reason: &str) -> String {
    let item = match (hash, uid) {
        (Some(hash), _) => hash,
        (None, Some(uid)) => format!("uid {}", uid),
        (None, None) => "folder".to_string(),
    };
    format!("{}: {}", item, reason)
}

/// Directory holding the journals of every mailbox
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> CheckpointResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| CheckpointError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn journal_path(&self, phase: Phase, label: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{}.db", phase, name_codec::label_dir(label)))
    }

    /// Load the journal of one mailbox and hold it until [`Checkpoint::close`]
    pub async fn open(&self, phase: Phase, label: &str) -> CheckpointResult<Checkpoint> {
        let path = self.journal_path(phase, label);
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .locking_mode(SqliteLockingMode::Exclusive)
            .journal_mode(SqliteJournalMode::Delete)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(LOCK_WAIT);

        let mut conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(|e| CheckpointError::from_open(&path, e))?;

        match Checkpoint::load(&mut conn, &path, phase, label).await {
            Ok(folders) => {
                debug!(
                    "Loaded checkpoint {} ({} folders)",
                    path.display(),
                    folders.len()
                );
                Ok(Checkpoint {
                    path,
                    label: label.to_string(),
                    conn,
                    folders,
                })
            }
            Err(e) => {
                if let Err(close_error) = conn.close().await {
                    debug!("Closing {} failed: {}", path.display(), close_error);
                }
                Err(e)
            }
        }
    }
}

/// Open journal of one mailbox for one phase
///
/// Lookups are answered from memory; every change is written to the database
/// first and mirrored only once it is committed.
pub struct Checkpoint {
    path: PathBuf,
    label: String,
    conn: SqliteConnection,
    folders: HashMap<FolderPath, FolderProgress>,
}

impl Checkpoint {
    async fn load(
        conn: &mut SqliteConnection,
        path: &Path,
        phase: Phase,
        label: &str,
    ) -> CheckpointResult<HashMap<FolderPath, FolderProgress>> {
        Self::migrate(conn).await.map_err(|e| CheckpointError::from_open(path, e))?;

        // A write takes the exclusive lock, which is then kept until close
        sqlx::query(
            r#"
            INSERT INTO journal_meta (key, value) VALUES ('opened_at', ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await
        .map_err(|e| CheckpointError::from_open(path, e))?;

        Self::claim(conn, path, "label", label).await?;
        Self::claim(conn, path, "phase", &phase.to_string()).await?;

        let mut folders: HashMap<FolderPath, FolderProgress> = HashMap::new();

        let rows = sqlx::query("SELECT folder, hash FROM migrated")
            .fetch_all(&mut *conn)
            .await?;
        for row in rows {
            let folder: FolderPath = serde_json::from_str(row.try_get("folder")?)?;
            let hash: String = row.try_get("hash")?;
            folders.entry(folder).or_default().migrated.insert(hash);
        }

        let rows = sqlx::query("SELECT folder, uid_validity, finished_at FROM folders")
            .fetch_all(&mut *conn)
            .await?;
        for row in rows {
            let folder: FolderPath = serde_json::from_str(row.try_get("folder")?)?;
            let uid_validity: Option<i64> = row.try_get("uid_validity")?;
            let finished_at: Option<String> = row.try_get("finished_at")?;
            let progress = folders.entry(folder).or_default();
            progress.uid_validity = uid_validity.and_then(|v| u32::try_from(v).ok());
            progress.done = finished_at.is_some();
        }

        let rows = sqlx::query("SELECT folder, uid, hash FROM source_uids")
            .fetch_all(&mut *conn)
            .await?;
        for row in rows {
            let folder: FolderPath = serde_json::from_str(row.try_get("folder")?)?;
            let uid: i64 = row.try_get("uid")?;
            let hash: String = row.try_get("hash")?;
            if let Ok(uid) = u32::try_from(uid) {
                folders.entry(folder).or_default().uids.insert(uid, hash);
            }
        }

        let rows = sqlx::query("SELECT folder, hash, uid, reason FROM failures ORDER BY id")
            .fetch_all(&mut *conn)
            .await?;
        for row in rows {
            let folder: FolderPath = serde_json::from_str(row.try_get("folder")?)?;
            let hash: Option<String> = row.try_get("hash")?;
            let uid: Option<i64> = row.try_get("uid")?;
            let reason: String = row.try_get("reason")?;
            let uid = uid.and_then(|v| u32::try_from(v).ok());
            folders
                .entry(folder)
                .or_default()
                .failures
                .push(failure_line(hash, uid, &reason));
        }

        Ok(folders)
    }

    async fn migrate(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS journal_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS migrated (
                folder TEXT NOT NULL,
                hash TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (folder, hash)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS folders (
                folder TEXT PRIMARY KEY,
                uid_validity INTEGER,
                finished_at TEXT
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS source_uids (
                folder TEXT NOT NULL,
                uid INTEGER NOT NULL,
                hash TEXT NOT NULL,
                PRIMARY KEY (folder, uid)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS failures (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                folder TEXT NOT NULL,
                hash TEXT,
                uid INTEGER,
                reason TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Record `value` under `key` the first time, refuse a different one later
    async fn claim(
        conn: &mut SqliteConnection,
        path: &Path,
        key: &str,
        value: &str,
    ) -> CheckpointResult<()> {
        sqlx::query("INSERT OR IGNORE INTO journal_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *conn)
            .await?;
        let row = sqlx::query("SELECT value FROM journal_meta WHERE key = ?")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;
        let found: String = row.try_get("value")?;
        if found != value {
            return Err(CheckpointError::WrongOwner {
                path: path.to_path_buf(),
                expected: value.to_string(),
                found,
            });
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn folder(&self, folder: &[String]) -> Option<&FolderProgress> {
        self.folders.get(folder)
    }

    pub fn is_migrated(&self, folder: &[String], content_hash: &str) -> bool {
        self.folders
            .get(folder)
            .map(|p| p.migrated.contains(content_hash))
            .unwrap_or(false)
    }

    /// Hash recorded for a source UID, valid only while UIDVALIDITY is unchanged
    pub fn cached_hash(&self, folder: &[String], uid_validity: u32, uid: u32) -> Option<&str> {
        let progress = self.folders.get(folder)?;
        if progress.uid_validity != Some(uid_validity) {
            return None;
        }
        progress.uids.get(&uid).map(String::as_str)
    }

    pub fn is_folder_done(&self, folder: &[String]) -> bool {
        self.folders.get(folder).map(|p| p.done).unwrap_or(false)
    }

    pub fn migrated_count(&self, folder: &[String]) -> usize {
        self.folders.get(folder).map(|p| p.migrated()).unwrap_or(0)
    }

    /// Record a message as transferred, with the source UID it came from if known.
    /// A new UIDVALIDITY drops every UID cached for the folder.
    pub async fn record_message(
        &mut self,
        folder: &[String],
        content_hash: &str,
        source_uid: Option<(u32, u32)>,
    ) -> CheckpointResult<()> {
        let key = serde_json::to_string(folder)?;
        let validity_changed = match (source_uid, self.folders.get(folder)) {
            (Some((validity, _)), Some(progress)) => progress.uid_validity != Some(validity),
            (Some(_), None) => true,
            (None, _) => false,
        };

        let mut tx = self.conn.begin().await?;
        sqlx::query(
            "INSERT OR IGNORE INTO migrated (folder, hash, recorded_at) VALUES (?, ?, ?)",
        )
        .bind(&key)
        .bind(content_hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if let Some((validity, uid)) = source_uid {
            if validity_changed {
                sqlx::query(
                    r#"
                    INSERT INTO folders (folder, uid_validity) VALUES (?, ?)
                    ON CONFLICT(folder) DO UPDATE SET uid_validity = excluded.uid_validity
                    "#,
                )
                .bind(&key)
                .bind(i64::from(validity))
                .execute(&mut *tx)
                .await?;
                sqlx::query("DELETE FROM source_uids WHERE folder = ?")
                    .bind(&key)
                    .execute(&mut *tx)
                    .await?;
            }
            sqlx::query(
                r#"
                INSERT INTO source_uids (folder, uid, hash) VALUES (?, ?, ?)
                ON CONFLICT(folder, uid) DO UPDATE SET hash = excluded.hash
                "#,
            )
            .bind(&key)
            .bind(i64::from(uid))
            .bind(content_hash)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let progress = self.folders.entry(folder.to_vec()).or_default();
        if let Some((validity, uid)) = source_uid {
            if validity_changed {
                progress.uid_validity = Some(validity);
                progress.uids.clear();
            }
            progress.uids.insert(uid, content_hash.to_string());
        }
        progress.migrated.insert(content_hash.to_string());
        Ok(())
    }

    pub async fn record_failure(
        &mut self,
        folder: &[String],
        content_hash: Option<&str>,
        uid: Option<u32>,
        reason: &str,
    ) -> CheckpointResult<()> {
        sqlx::query(
            "INSERT INTO failures (folder, hash, uid, reason, recorded_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(serde_json::to_string(folder)?)
        .bind(content_hash)
        .bind(uid.map(i64::from))
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut self.conn)
        .await?;

        self.folders
            .entry(folder.to_vec())
            .or_default()
            .failures
            .push(failure_line(content_hash.map(str::to_string), uid, reason));
        Ok(())
    }

    pub async fn mark_folder_done(&mut self, folder: &[String]) -> CheckpointResult<()> {
        if self.is_folder_done(folder) {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO folders (folder, finished_at) VALUES (?, ?)
            ON CONFLICT(folder) DO UPDATE SET finished_at = excluded.finished_at
            "#,
        )
        .bind(serde_json::to_string(folder)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut self.conn)
        .await?;

        debug!("Folder {} done for {}", display_path(folder), self.label);
        self.folders.entry(folder.to_vec()).or_default().done = true;
        Ok(())
    }

    /// Release the journal. Everything recorded is already committed.
    pub async fn close(self) {
        if let Err(error) = self.conn.close().await {
            warn!("Closing checkpoint {} failed: {}", self.path.display(), error);
        }
    }
}
