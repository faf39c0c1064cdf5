use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Display path of a folder: decoded hierarchy segments from the root.
pub type FolderPath = Vec<String>;

/// Render a display path for humans and logs, always with `/`
pub fn display_path(path: &[String]) -> String {
    path.join("/")
}

/// One folder of a mailbox as listed by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderNode {
    /// Full name exactly as the server sent it (modified UTF-7)
    pub wire_name: String,
    /// Decoded leaf segment
    pub display_name: String,
    /// Decoded segments from the root, `INBOX` normalised
    pub path: FolderPath,
    pub delimiter: Option<String>,
    pub selectable: bool,
    /// Not listed by the server; only present because a listed folder lives below it
    pub implicit: bool,
    pub message_count: u32,
    pub children: Vec<FolderNode>,
}

impl FolderNode {
    pub fn is_inbox(&self) -> bool {
        self.path.len() == 1 && self.path[0] == "INBOX"
    }
}

/// Why a listed folder was left out of the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderIssueKind {
    Encoding(String),
    Conflict(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderIssue {
    pub wire_name: String,
    pub kind: FolderIssueKind,
}

/// Folder hierarchy of one mailbox, in server order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderTree {
    pub roots: Vec<FolderNode>,
    /// Hierarchy separator the server reported
    pub delimiter: Option<String>,
    pub issues: Vec<FolderIssue>,
}

impl FolderTree {
    /// Pre-order walk: every parent comes before its children, siblings keep server order
    pub fn iter(&self) -> impl Iterator<Item = &FolderNode> {
        let mut stack: Vec<&FolderNode> = self.roots.iter().rev().collect();
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn find(&self, path: &[String]) -> Option<&FolderNode> {
        self.iter().find(|node| node.path == path)
    }

    pub fn find_mut(&mut self, path: &[String]) -> Option<&mut FolderNode> {
        let mut siblings = &mut self.roots;
        for level in 1..=path.len() {
            let index = siblings.iter().position(|n| n.path == path[..level])?;
            if level == path.len() {
                return Some(&mut siblings[index]);
            }
            siblings = &mut siblings[index].children;
        }
        None
    }

    /// Folders that can be examined, as `(path, wire name)` pairs in walk order
    pub fn selectable_folders(&self) -> Vec<(FolderPath, String)> {
        self.iter()
            .filter(|node| node.selectable)
            .map(|node| (node.path.clone(), node.wire_name.clone()))
            .collect()
    }

    pub fn total_messages(&self) -> u64 {
        self.iter().map(|node| u64::from(node.message_count)).sum()
    }

    /// Indented listing with message counts
    pub fn render(&self) -> String {
        let mut out = String::new();
        for node in self.iter() {
            let indent = "  ".repeat(node.path.len().saturating_sub(1));
            let _ = write!(out, "{}{}", indent, node.display_name);
            if node.selectable {
                let _ = write!(out, " ({})", node.message_count);
            } else {
                out.push_str(" [no select]");
            }
            out.push('\n');
        }
        for issue in &self.issues {
            let reason = match &issue.kind {
                FolderIssueKind::Encoding(reason) | FolderIssueKind::Conflict(reason) => reason,
            };
            let _ = writeln!(out, "! {} skipped: {}", issue.wire_name, reason);
        }
        out
    }

    /// Insert a node below its parent, creating implicit parents as needed.
    pub(crate) fn insert(&mut self, node: FolderNode) {
        let depth = node.path.len();
        let mut siblings = &mut self.roots;
        for level in 1..depth {
            let prefix = &node.path[..level];
            let index = match siblings.iter().position(|n| n.path == prefix) {
                Some(index) => index,
                None => {
                    siblings.push(implicit_parent(&node, level));
                    siblings.len() - 1
                }
            };
            siblings = &mut siblings[index].children;
        }

        match siblings.iter().position(|n| n.path == node.path) {
            // Listed after one of its children: replace the placeholder, keep the children
            Some(index) if siblings[index].implicit => {
                let children = std::mem::take(&mut siblings[index].children);
                siblings[index] = FolderNode { children, ..node };
            }
            Some(_) => {}
            None => siblings.push(node),
        }
    }
}

fn implicit_parent(child: &FolderNode, level: usize) -> FolderNode {
    let wire_name = match &child.delimiter {
        Some(delimiter) => child
            .wire_name
            .split(delimiter.as_str())
            .take(level)
            .collect::<Vec<_>>()
            .join(delimiter),
        None => child.wire_name.clone(),
    };
    FolderNode {
        wire_name,
        display_name: child.path[level - 1].clone(),
        path: child.path[..level].to_vec(),
        delimiter: child.delimiter.clone(),
        selectable: false,
        implicit: true,
        message_count: 0,
        children: Vec::new(),
    }
}
