//! Local archive of backed-up mailboxes.
//!
//! ```text
//! <output>/<label>/folders.json
//! <output>/<label>/INBOX.imr
//! <output>/<label>/INBOX/Work.imr
//! ```

pub mod manifest;
pub mod name_codec;
pub mod record;
pub mod store;

pub use manifest::{FolderManifest, ManifestEntry, MANIFEST_FILE};
pub use record::{content_hash, MessageRecord};
pub use store::{MessageArchiveStore, RecordIter};

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors from the local archive
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive {path} is damaged: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Archive {path} holds folder {found}, expected {expected}")]
    FolderMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Too large to archive: {0}")]
    TooLarge(String),

    #[error("Invalid folder path: {0}")]
    InvalidPath(String),
}

impl ArchiveError {
    pub fn io<P: AsRef<Path>>(path: P, source: io::Error) -> Self {
        ArchiveError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Archive directory of one mailbox
#[derive(Debug, Clone)]
pub struct MailboxArchive {
    root: PathBuf,
}

impl MailboxArchive {
    pub fn new<P: AsRef<Path>>(output: P, label: &str) -> Self {
        Self {
            root: output.as_ref().join(name_codec::label_dir(label)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.join(MANIFEST_FILE).is_file()
    }

    /// Record file of a folder: one directory per parent segment, `.imr` leaf
    pub fn folder_file(&self, path: &[String]) -> ArchiveResult<PathBuf> {
        let (leaf, parents) = path
            .split_last()
            .ok_or_else(|| ArchiveError::InvalidPath("empty folder path".to_string()))?;
        let mut file = self.root.clone();
        for segment in parents {
            file.push(name_codec::encode(segment));
        }
        file.push(format!("{}.imr", name_codec::encode(leaf)));
        Ok(file)
    }

    pub fn open_folder(&self, path: &[String]) -> ArchiveResult<MessageArchiveStore> {
        MessageArchiveStore::open(self.folder_file(path)?, path.to_vec())
    }

    pub fn has_folder(&self, path: &[String]) -> bool {
        self.folder_file(path).map(|f| f.is_file()).unwrap_or(false)
    }

    pub fn load_manifest(&self) -> ArchiveResult<Option<FolderManifest>> {
        let path = self.root.join(MANIFEST_FILE);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ArchiveError::io(&path, e)),
        };
        let manifest = serde_json::from_slice(&content).map_err(|e| ArchiveError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Some(manifest))
    }

    /// Write the manifest atomically (temp file, then rename).
    pub fn save_manifest(&self, manifest: &FolderManifest) -> ArchiveResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| ArchiveError::io(&self.root, e))?;
        let path = self.root.join(MANIFEST_FILE);
        let tmp = self.root.join(format!("{}.tmp", MANIFEST_FILE));

        let content = serde_json::to_vec_pretty(manifest)?;
        let mut file = fs::File::create(&tmp).map_err(|e| ArchiveError::io(&tmp, e))?;
        file.write_all(&content)
            .and_then(|_| file.sync_all())
            .map_err(|e| ArchiveError::io(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &path).map_err(|e| ArchiveError::io(&path, e))?;
        tracing::debug!(
            "Saved manifest with {} folders to {}",
            manifest.folders.len(),
            path.display()
        );
        Ok(())
    }
}
