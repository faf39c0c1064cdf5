//! On-disk framing of one archived message.
//!
//! ```text
//! "IMR1" | u32 BE header len | JSON header | u64 BE body len | body | SHA-256(header || body)
//! ```
//!
//! Every field needed to find the next record is inside the frame, and the
//! trailing digest covers both variable parts, so a record cut short by a
//! crash is recognised instead of being read as data.

use crate::archive::{ArchiveError, ArchiveResult};
use crate::catalog::FolderPath;
use crate::imap::MessageFlag;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::{self, Read};

pub const RECORD_MAGIC: &[u8; 4] = b"IMR1";
const DIGEST_LEN: usize = 32;
const MAX_HEADER_LEN: u32 = 1 << 20;
/// Largest message body a record, and so a fetched literal, may carry
pub const MAX_BODY_LEN: u64 = 1 << 32;

/// Stable cross-session identity of a message: SHA-256 of its raw bytes, hex
pub fn content_hash(raw: &[u8]) -> String {
    format!("{:x}", Sha256::digest(raw))
}

/// One message with everything needed to recreate it on another server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub folder_path: FolderPath,
    /// Source UID, informational only
    pub uid: u32,
    pub content_hash: String,
    pub flags: BTreeSet<MessageFlag>,
    pub internal_date: Option<DateTime<FixedOffset>>,
    pub raw_content: Vec<u8>,
}

impl MessageRecord {
    pub fn new(
        folder_path: FolderPath,
        uid: u32,
        flags: impl IntoIterator<Item = MessageFlag>,
        internal_date: Option<DateTime<FixedOffset>>,
        raw_content: Vec<u8>,
    ) -> Self {
        Self {
            content_hash: content_hash(&raw_content),
            folder_path,
            uid,
            flags: flags.into_iter().collect(),
            internal_date,
            raw_content,
        }
    }

    /// Flags to send on upload, in a stable order
    pub fn upload_flags(&self) -> Vec<MessageFlag> {
        self.flags
            .iter()
            .filter(|flag| flag.is_settable())
            .cloned()
            .collect()
    }

    /// Serialize into a single self-delimiting frame
    pub fn encode(&self) -> ArchiveResult<Vec<u8>> {
        let header = serde_json::to_vec(&RecordHeader {
            content_hash: self.content_hash.clone(),
            uid: self.uid,
            flags: self.flags.iter().cloned().collect(),
            internal_date: self.internal_date,
            folder_path: self.folder_path.clone(),
        })?;
        let header_len = u32::try_from(header.len())
            .ok()
            .filter(|len| *len <= MAX_HEADER_LEN)
            .ok_or_else(|| ArchiveError::TooLarge("record header".to_string()))?;
        let body_len = self.raw_content.len() as u64;
        if body_len > MAX_BODY_LEN {
            return Err(ArchiveError::TooLarge(format!(
                "message of {} bytes",
                body_len
            )));
        }

        let mut hasher = Sha256::new();
        hasher.update(&header);
        hasher.update(&self.raw_content);
        let digest = hasher.finalize();

        let mut frame =
            Vec::with_capacity(4 + 4 + header.len() + 8 + self.raw_content.len() + DIGEST_LEN);
        frame.extend_from_slice(RECORD_MAGIC);
        frame.extend_from_slice(&header_len.to_be_bytes());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&body_len.to_be_bytes());
        frame.extend_from_slice(&self.raw_content);
        frame.extend_from_slice(&digest);
        Ok(frame)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordHeader {
    content_hash: String,
    uid: u32,
    flags: Vec<MessageFlag>,
    internal_date: Option<DateTime<FixedOffset>>,
    folder_path: FolderPath,
}

/// Result of reading at one offset
#[derive(Debug)]
pub enum Frame {
    Record { record: MessageRecord, len: u64 },
    /// Clean end of data, exactly on a record boundary
    End,
    /// Bytes that do not form a complete, valid record
    Invalid(String),
}

/// Read the next frame. I/O errors other than a short read are returned as errors.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Frame> {
    let mut magic = [0u8; 4];
    match read_full(reader, &mut magic)? {
        0 => return Ok(Frame::End),
        4 => {}
        _ => return Ok(Frame::Invalid("truncated record magic".to_string())),
    }
    if &magic != RECORD_MAGIC {
        return Ok(Frame::Invalid("bad record magic".to_string()));
    }

    let mut len_buf = [0u8; 4];
    if read_full(reader, &mut len_buf)? != 4 {
        return Ok(Frame::Invalid("truncated header length".to_string()));
    }
    let header_len = u32::from_be_bytes(len_buf);
    if header_len > MAX_HEADER_LEN {
        return Ok(Frame::Invalid(format!("implausible header length {}", header_len)));
    }
    let mut header = vec![0u8; header_len as usize];
    if read_full(reader, &mut header)? != header.len() {
        return Ok(Frame::Invalid("truncated header".to_string()));
    }

    let mut body_len_buf = [0u8; 8];
    if read_full(reader, &mut body_len_buf)? != 8 {
        return Ok(Frame::Invalid("truncated body length".to_string()));
    }
    let body_len = u64::from_be_bytes(body_len_buf);
    if body_len > MAX_BODY_LEN {
        return Ok(Frame::Invalid(format!("implausible body length {}", body_len)));
    }

    let mut body = Vec::new();
    let read = Read::take(&mut *reader, body_len).read_to_end(&mut body)?;
    if read as u64 != body_len {
        return Ok(Frame::Invalid("truncated body".to_string()));
    }

    let mut digest = [0u8; DIGEST_LEN];
    if read_full(reader, &mut digest)? != DIGEST_LEN {
        return Ok(Frame::Invalid("truncated digest".to_string()));
    }
    let mut hasher = Sha256::new();
    hasher.update(&header);
    hasher.update(&body);
    if hasher.finalize().as_slice() != digest {
        return Ok(Frame::Invalid("digest mismatch".to_string()));
    }

    let header: RecordHeader = match serde_json::from_slice(&header) {
        Ok(header) => header,
        Err(e) => return Ok(Frame::Invalid(format!("unreadable header: {}", e))),
    };
    if header.content_hash != content_hash(&body) {
        return Ok(Frame::Invalid("content hash does not match body".to_string()));
    }

    let len = 4 + 4 + u64::from(header_len) + 8 + body_len + DIGEST_LEN as u64;
    Ok(Frame::Record {
        record: MessageRecord {
            folder_path: header.folder_path,
            uid: header.uid,
            content_hash: header.content_hash,
            flags: header.flags.into_iter().collect(),
            internal_date: header.internal_date,
            raw_content: body,
        },
        len,
    })
}

/// Like `read_exact`, but reports how much was read instead of failing at EOF
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
