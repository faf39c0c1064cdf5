//! IMAP4rev1 client plumbing: wire codec, a tagged-command connection,
//! and the typed session the migration engine drives.

pub mod client;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod session;
pub mod types;

pub use client::ImapClient;
pub use connection::ImapConnection;
pub use error::{ImapError, ImapResult};
pub use protocol::{FetchData, ImapProtocol, ResponseLine};
pub use session::{ImapSession, SessionConnector, TcpConnector};
pub use types::*;

use std::fmt;

/// Server capabilities that change how we log in
///
/// Anything else the server advertises is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImapCapability {
    Imap4Rev1,
    StartTls,
    LoginDisabled,
    AuthPlain,
    Other(String),
}

impl ImapCapability {
    /// Case-insensitive; one atom of a CAPABILITY response
    pub fn parse(atom: &str) -> Self {
        match atom.to_ascii_uppercase().as_str() {
            "IMAP4REV1" => Self::Imap4Rev1,
            "STARTTLS" => Self::StartTls,
            "LOGINDISABLED" => Self::LoginDisabled,
            "AUTH=PLAIN" => Self::AuthPlain,
            _ => Self::Other(atom.to_string()),
        }
    }
}

/// Where and as whom to connect
#[derive(Clone)]
pub struct ImapConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
    pub timeout_seconds: u64,
}

impl ImapConfig {
    /// Implicit TLS is assumed on 993 and nowhere else
    pub fn new(hostname: String, port: u16, username: String, password: String) -> Self {
        let use_tls = port == 993;
        Self {
            hostname,
            port,
            username,
            password,
            use_tls,
            timeout_seconds: 60,
        }
    }

    pub fn with_tls(self, use_tls: bool) -> Self {
        Self { use_tls, ..self }
    }

    pub fn with_timeout(self, timeout_seconds: u64) -> Self {
        Self {
            timeout_seconds,
            ..self
        }
    }

    /// `user@host:port` for log lines
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.username, self.hostname, self.port)
    }
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"******")
            .field("use_tls", &self.use_tls)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}
