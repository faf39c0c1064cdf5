use crate::catalog::{FolderPath, FolderTree};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MANIFEST_FILE: &str = "folders.json";
pub const MANIFEST_VERSION: u32 = 1;

/// Folder list of a backed-up mailbox, in source catalog order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderManifest {
    pub version: u32,
    pub label: String,
    pub created_at: DateTime<Utc>,
    /// Hierarchy separator of the source server
    pub delimiter: Option<String>,
    pub folders: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: FolderPath,
    pub wire_name: String,
    pub selectable: bool,
    pub message_count: u32,
}

impl FolderManifest {
    pub fn from_tree(label: &str, tree: &FolderTree) -> Self {
        Self {
            version: MANIFEST_VERSION,
            label: label.to_string(),
            created_at: Utc::now(),
            delimiter: tree.delimiter.clone(),
            folders: tree
                .iter()
                .map(|node| ManifestEntry {
                    path: node.path.clone(),
                    wire_name: node.wire_name.clone(),
                    selectable: node.selectable,
                    message_count: node.message_count,
                })
                .collect(),
        }
    }

    /// Keep what an earlier run recorded and add folders that are new in `other`
    pub fn merge(&mut self, other: FolderManifest) {
        for entry in other.folders {
            match self.folders.iter_mut().find(|f| f.path == entry.path) {
                Some(existing) => *existing = entry,
                None => self.folders.push(entry),
            }
        }
        self.delimiter = other.delimiter.or(self.delimiter.take());
        self.created_at = other.created_at;
    }
}
