//! Folder enumeration: turns the server's LIST output into an ordered tree of
//! decoded folder paths with message counts.

pub mod tree;

pub use tree::{display_path, FolderIssue, FolderIssueKind, FolderNode, FolderPath, FolderTree};

use crate::codec;
use crate::imap::{ImapError, ImapFolder, ImapResult, ImapSession};
use std::collections::HashMap;
use thiserror::Error;

/// A display path that cannot be expressed as a destination folder name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("folder segment {segment:?} contains the destination separator {separator:?}")]
    SeparatorInSegment { segment: String, separator: String },

    #[error("nested folder {path} cannot be created on a server without hierarchy separator")]
    NoSeparator { path: String },
}

/// Enumerate the folder tree of a connected session.
///
/// Folders whose names do not decode, or whose decoded paths collide, are left
/// out of the tree and reported in [`FolderTree::issues`].
pub async fn list_folders(session: &mut dyn ImapSession) -> ImapResult<FolderTree> {
    if !session.is_connected() {
        return Err(ImapError::connection("Session is not connected"));
    }

    let listed = session.list_folders().await?;
    let mut tree = build_tree(listed);

    for (path, wire_name) in tree.selectable_folders() {
        let count = count_messages(session, &wire_name).await?;
        if let Some(node) = tree.find_mut(&path) {
            node.message_count = count;
        }
    }

    if tree.delimiter.is_none() {
        tree.delimiter = session.hierarchy_delimiter().await?;
    }

    tracing::debug!(
        "Listed {} folders ({} skipped), delimiter {:?}",
        tree.len(),
        tree.issues.len(),
        tree.delimiter
    );

    Ok(tree)
}

/// Arrange a LIST reply into a tree. Message counts are left at zero.
pub fn build_tree(listed: Vec<ImapFolder>) -> FolderTree {
    let mut tree = FolderTree {
        delimiter: listed.iter().find_map(|folder| folder.delimiter.clone()),
        ..FolderTree::default()
    };

    let mut decoded = Vec::with_capacity(listed.len());
    for folder in listed {
        if folder.full_name.is_empty() {
            continue;
        }
        match decode_path(&folder) {
            Ok(path) => decoded.push((folder, path)),
            Err(e) => {
                tracing::warn!("Skipping folder {:?}: {}", folder.full_name, e);
                tree.issues.push(FolderIssue {
                    wire_name: folder.full_name,
                    kind: FolderIssueKind::Encoding(e.to_string()),
                });
            }
        }
    }

    let mut wire_names_by_path: HashMap<&FolderPath, Vec<&str>> = HashMap::new();
    for (folder, path) in &decoded {
        let names = wire_names_by_path.entry(path).or_default();
        if !names.contains(&folder.full_name.as_str()) {
            names.push(&folder.full_name);
        }
    }
    let conflicted: Vec<(FolderPath, String)> = wire_names_by_path
        .into_iter()
        .filter(|(_, names)| names.len() > 1)
        .map(|(path, names)| (path.clone(), names.join(", ")))
        .collect();

    for (folder, path) in decoded {
        if let Some((_, names)) = conflicted.iter().find(|(p, _)| *p == path) {
            tracing::warn!(
                "Folder {:?} maps to the same name as another folder: {}",
                display_path(&path),
                names
            );
            tree.issues.push(FolderIssue {
                wire_name: folder.full_name,
                kind: FolderIssueKind::Conflict(format!(
                    "{} is claimed by {}",
                    display_path(&path),
                    names
                )),
            });
            continue;
        }

        tree.insert(FolderNode {
            display_name: path.last().cloned().unwrap_or_default(),
            selectable: folder.is_selectable(),
            path,
            wire_name: folder.full_name,
            delimiter: folder.delimiter,
            implicit: false,
            message_count: 0,
            children: Vec::new(),
        });
    }

    tree
}

/// Message count of one folder via STATUS
///
/// A tagged NO only loses the count, so it comes back as zero.
pub async fn count_messages(session: &mut dyn ImapSession, wire_name: &str) -> ImapResult<u32> {
    match session.status_messages(wire_name).await {
        Ok(count) => Ok(count),
        Err(ImapError::Server(msg)) => {
            tracing::warn!("STATUS {} refused: {}", wire_name, msg);
            Ok(0)
        }
        Err(e) => Err(e),
    }
}

/// Split a wire name on its delimiter and decode every segment
pub fn decode_path(folder: &ImapFolder) -> Result<FolderPath, codec::EncodingError> {
    let segments: Vec<&str> = match folder.delimiter.as_deref() {
        Some(delimiter) if !delimiter.is_empty() => folder.full_name.split(delimiter).collect(),
        _ => vec![folder.full_name.as_str()],
    };

    let mut path = Vec::with_capacity(segments.len());
    for segment in segments {
        path.push(codec::decode(segment.as_bytes())?);
    }
    normalise_inbox(&mut path);
    Ok(path)
}

/// `INBOX` is case-insensitive at the top level
pub fn normalise_inbox(path: &mut FolderPath) {
    if let Some(first) = path.first_mut() {
        if first.eq_ignore_ascii_case("INBOX") {
            *first = "INBOX".to_string();
        }
    }
}

/// Wire name for a display path on a server with the given separator
pub fn destination_name(path: &[String], separator: Option<&str>) -> Result<String, MappingError> {
    let separator = match separator.filter(|s| !s.is_empty()) {
        Some(separator) => separator,
        None if path.len() <= 1 => {
            return Ok(path.first().map(|s| codec::encode(s)).unwrap_or_default())
        }
        None => {
            return Err(MappingError::NoSeparator {
                path: display_path(path),
            })
        }
    };

    let mut encoded = Vec::with_capacity(path.len());
    for segment in path {
        if segment.contains(separator) {
            return Err(MappingError::SeparatorInSegment {
                segment: segment.clone(),
                separator: separator.to_string(),
            });
        }
        encoded.push(codec::encode(segment));
    }
    Ok(encoded.join(separator))
}
