use std::io;
use thiserror::Error;

pub type ImapResult<T> = Result<T, ImapError>;

/// Everything that can go wrong while talking to one IMAP server
#[derive(Error, Debug)]
pub enum ImapError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Socket could not be opened, or the server hung up
    #[error("Connection error: {0}")]
    Connection(String),

    /// LOGIN or AUTHENTICATE was refused
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A BAD reply or a line we could not make sense of
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A tagged NO; the payload is the full status line
    #[error("Server error: {0}")]
    Server(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Parse error: {0}")]
    Parse(String),

    /// Command issued before its prerequisite (no login, no folder examined)
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// What part of the session an error invalidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// The stream is gone or unusable
    Link,
    /// Credentials are wrong; retrying cannot help
    Credentials,
    /// One reply was malformed
    Reply,
    /// The server declined this one command
    Command,
    /// Caller bug
    Usage,
}

impl ImapError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }

    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    fn scope(&self) -> Scope {
        match self {
            Self::Io(_) | Self::Connection(_) | Self::Timeout | Self::Tls(_) => Scope::Link,
            Self::Authentication(_) => Scope::Credentials,
            Self::Protocol(_) | Self::Parse(_) => Scope::Reply,
            Self::Server(_) => Scope::Command,
            Self::InvalidState(_) => Scope::Usage,
        }
    }

    /// Whether the same command may succeed on a later attempt
    ///
    /// A failed TLS handshake is a configuration problem, so it is not retried
    /// even though it counts as a link error.
    pub fn is_recoverable(&self) -> bool {
        match self.scope() {
            Scope::Link => !matches!(self, Self::Tls(_)),
            Scope::Reply | Scope::Command => true,
            Scope::Credentials | Scope::Usage => false,
        }
    }

    /// The session must be dropped and reopened before anything else is sent
    pub fn is_connection_error(&self) -> bool {
        self.scope() == Scope::Link
    }

    pub fn is_auth_error(&self) -> bool {
        self.scope() == Scope::Credentials
    }

    /// Tests a tagged NO for a bracketed response code such as `ALREADYEXISTS`
    pub fn has_response_code(&self, code: &str) -> bool {
        let Self::Server(line) = self else {
            return false;
        };
        let wanted = format!("[{}", code.to_ascii_uppercase());
        line.to_ascii_uppercase().contains(&wanted)
    }
}
