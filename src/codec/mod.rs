//! Folder name codec
//!
//! IMAP servers exchange mailbox names in "modified UTF-7" (RFC 3501 §5.1.3).
//! Everything above the wire layer works with the decoded UTF-8 display name.

pub mod utf7;

pub use utf7::{decode, encode, EncodingError};
