use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// IMAP `date-time` as used by INTERNALDATE and APPEND
pub const IMAP_DATE_FORMAT: &str = "%d-%b-%Y %H:%M:%S %z";

/// One row of a LIST response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapFolder {
    /// Raw wire name, still in modified UTF-7
    pub full_name: String,
    pub delimiter: Option<String>,
    pub attributes: Vec<FolderAttribute>,
}

impl ImapFolder {
    pub fn new(full_name: String) -> Self {
        Self {
            full_name,
            delimiter: None,
            attributes: Vec::new(),
        }
    }

    /// False for `\Noselect` parents and `\NonExistent` placeholders
    pub fn is_selectable(&self) -> bool {
        !self
            .attributes
            .iter()
            .any(|a| matches!(a, FolderAttribute::Noselect | FolderAttribute::NonExistent))
    }

    pub fn has_children(&self) -> bool {
        self.attributes.contains(&FolderAttribute::HasChildren)
    }
}

/// LIST name attributes the catalog cares about
///
/// Special-use markers and extensions land in `Other` untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FolderAttribute {
    Noselect,
    NonExistent,
    HasChildren,
    HasNoChildren,
    Other(String),
}

impl FolderAttribute {
    pub fn parse(attr: &str) -> Self {
        let lower = attr.to_ascii_lowercase();
        match lower.strip_prefix('\\') {
            Some("noselect") => Self::Noselect,
            Some("nonexistent") => Self::NonExistent,
            Some("haschildren") => Self::HasChildren,
            Some("hasnochildren") => Self::HasNoChildren,
            _ => Self::Other(attr.to_string()),
        }
    }
}

/// A message flag in wire form (`\Seen`, `$Forwarded`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageFlag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Recent,
    /// Keyword, case preserved
    Custom(String),
}

const SYSTEM_FLAGS: [(&str, MessageFlag); 6] = [
    ("\\Seen", MessageFlag::Seen),
    ("\\Answered", MessageFlag::Answered),
    ("\\Flagged", MessageFlag::Flagged),
    ("\\Deleted", MessageFlag::Deleted),
    ("\\Draft", MessageFlag::Draft),
    ("\\Recent", MessageFlag::Recent),
];

impl MessageFlag {
    /// System flags match case-insensitively, keywords are kept as given
    pub fn parse(flag: &str) -> Self {
        SYSTEM_FLAGS
            .iter()
            .find(|(wire, _)| wire.eq_ignore_ascii_case(flag))
            .map(|(_, known)| known.clone())
            .unwrap_or_else(|| Self::Custom(flag.to_string()))
    }

    pub fn as_imap(&self) -> &str {
        if let Self::Custom(keyword) = self {
            return keyword;
        }
        SYSTEM_FLAGS
            .iter()
            .find(|(_, known)| known == self)
            .map(|(wire, _)| *wire)
            .unwrap_or_default()
    }

    /// `\Recent` belongs to the server session; APPEND must not carry it
    pub fn is_settable(&self) -> bool {
        *self != Self::Recent
    }
}

impl fmt::Display for MessageFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap())
    }
}

impl From<String> for MessageFlag {
    fn from(flag: String) -> Self {
        Self::parse(&flag)
    }
}

impl From<MessageFlag> for String {
    fn from(flag: MessageFlag) -> Self {
        flag.as_imap().to_string()
    }
}

/// Untagged data from EXAMINE
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    pub exists: u32,
    pub uid_validity: Option<u32>,
    pub uid_next: Option<u32>,
}

/// Result of `UID FETCH <uid> (UID FLAGS INTERNALDATE BODY.PEEK[])`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub uid: u32,
    pub flags: Vec<MessageFlag>,
    pub internal_date: Option<DateTime<FixedOffset>>,
    pub body: Vec<u8>,
}
