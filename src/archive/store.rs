use crate::archive::record::{read_frame, Frame, MessageRecord};
use crate::archive::{ArchiveError, ArchiveResult};
use crate::catalog::{display_path, FolderPath};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Append-only record file holding the messages of one folder.
///
/// Dropping the store releases the file; [`MessageArchiveStore::close`]
/// additionally flushes it to disk and reports errors.
pub struct MessageArchiveStore {
    path: PathBuf,
    folder_path: FolderPath,
    file: File,
    hashes: HashSet<String>,
    valid_len: u64,
}

impl MessageArchiveStore {
    /// Open (creating if needed) the store at `path`.
    ///
    /// Existing records are scanned; anything after the last valid record is
    /// cut off so later appends start on a clean boundary.
    pub fn open<P: AsRef<Path>>(path: P, folder_path: FolderPath) -> ArchiveResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| ArchiveError::io(&path, e))?;

        let mut hashes = HashSet::new();
        let mut valid_len = 0u64;
        let mut reader = BufReader::new(file.try_clone().map_err(|e| ArchiveError::io(&path, e))?);
        reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| ArchiveError::io(&path, e))?;

        loop {
            match read_frame(&mut reader).map_err(|e| ArchiveError::io(&path, e))? {
                Frame::Record { record, len } => {
                    if record.folder_path != folder_path {
                        return Err(ArchiveError::FolderMismatch {
                            path,
                            expected: display_path(&folder_path),
                            found: display_path(&record.folder_path),
                        });
                    }
                    hashes.insert(record.content_hash);
                    valid_len += len;
                }
                Frame::End => break,
                Frame::Invalid(reason) => {
                    warn!(
                        "Discarding damaged tail of {} after {} bytes: {}",
                        path.display(),
                        valid_len,
                        reason
                    );
                    file.set_len(valid_len)
                        .map_err(|e| ArchiveError::io(&path, e))?;
                    file.sync_data().map_err(|e| ArchiveError::io(&path, e))?;
                    break;
                }
            }
        }

        debug!(
            "Opened archive {} with {} records",
            path.display(),
            hashes.len()
        );

        Ok(Self {
            path,
            folder_path,
            file,
            hashes,
            valid_len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn folder_path(&self) -> &FolderPath {
        &self.folder_path
    }

    pub fn contains(&self, content_hash: &str) -> bool {
        self.hashes.contains(content_hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Append a record and flush it to disk.
    ///
    /// Returns `false` without writing when a record with the same content
    /// hash is already stored.
    pub fn append(&mut self, record: &MessageRecord) -> ArchiveResult<bool> {
        if record.folder_path != self.folder_path {
            return Err(ArchiveError::FolderMismatch {
                path: self.path.clone(),
                expected: display_path(&self.folder_path),
                found: display_path(&record.folder_path),
            });
        }
        if self.hashes.contains(&record.content_hash) {
            return Ok(false);
        }

        let frame = record.encode()?;
        let written = self
            .file
            .write_all(&frame)
            .and_then(|_| self.file.sync_data());
        if let Err(e) = written {
            // Leave no partial frame behind for the next record to follow
            let _ = self.file.set_len(self.valid_len);
            return Err(ArchiveError::io(&self.path, e));
        }

        self.valid_len += frame.len() as u64;
        self.hashes.insert(record.content_hash.clone());
        Ok(true)
    }

    /// Iterate the stored records from the beginning, in insertion order.
    /// Each call starts a fresh pass over the file.
    pub fn iter(&self) -> ArchiveResult<RecordIter> {
        let file = File::open(&self.path).map_err(|e| ArchiveError::io(&self.path, e))?;
        Ok(RecordIter {
            path: self.path.clone(),
            reader: BufReader::new(file),
            remaining: self.valid_len,
            done: false,
        })
    }

    /// Flush and release the file
    pub fn close(self) -> ArchiveResult<()> {
        self.file
            .sync_all()
            .map_err(|e| ArchiveError::io(&self.path, e))
    }
}

/// Lazy pass over the records of one store
pub struct RecordIter {
    path: PathBuf,
    reader: BufReader<File>,
    remaining: u64,
    done: bool,
}

impl Iterator for RecordIter {
    type Item = ArchiveResult<MessageRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining == 0 {
            return None;
        }

        match read_frame(&mut self.reader) {
            Ok(Frame::Record { record, len }) => {
                self.remaining = self.remaining.saturating_sub(len);
                Some(Ok(record))
            }
            Ok(Frame::End) => None,
            Ok(Frame::Invalid(reason)) => {
                self.done = true;
                Some(Err(ArchiveError::Corrupt {
                    path: self.path.clone(),
                    reason,
                }))
            }
            Err(e) => {
                self.done = true;
                Some(Err(ArchiveError::io(&self.path, e)))
            }
        }
    }
}
