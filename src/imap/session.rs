//! The narrow set of IMAP operations the migrator needs, behind a trait so
//! the engine can be driven against an in-memory server in tests.

use crate::imap::{
    FetchedMessage, ImapClient, ImapConfig, ImapFolder, ImapResult, MailboxStatus, MessageFlag,
};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

/// An authenticated IMAP session. Folder names are wire names.
#[async_trait]
pub trait ImapSession: Send {
    /// `LIST "" "*"`
    async fn list_folders(&mut self) -> ImapResult<Vec<ImapFolder>>;

    /// `LIST "" ""`
    async fn hierarchy_delimiter(&mut self) -> ImapResult<Option<String>>;

    /// `STATUS <folder> (MESSAGES)`
    async fn status_messages(&mut self, folder: &str) -> ImapResult<u32>;

    /// Read-only selection
    async fn examine(&mut self, folder: &str) -> ImapResult<MailboxStatus>;

    async fn uid_search_all(&mut self) -> ImapResult<Vec<u32>>;

    async fn fetch_message(&mut self, uid: u32) -> ImapResult<Option<FetchedMessage>>;

    /// Succeeds if the folder already exists
    async fn create_folder(&mut self, folder: &str) -> ImapResult<()>;

    async fn append(
        &mut self,
        folder: &str,
        flags: &[MessageFlag],
        internal_date: Option<DateTime<FixedOffset>>,
        content: &[u8],
    ) -> ImapResult<()>;

    async fn logout(&mut self) -> ImapResult<()>;

    fn is_connected(&self) -> bool;
}

/// Opens authenticated sessions
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, config: &ImapConfig) -> ImapResult<Box<dyn ImapSession>>;
}

/// Connects over TCP, with TLS when the account asks for it
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

#[async_trait]
impl SessionConnector for TcpConnector {
    async fn connect(&self, config: &ImapConfig) -> ImapResult<Box<dyn ImapSession>> {
        tracing::debug!(
            "Connecting to {}:{} as {} (tls: {})",
            config.hostname,
            config.port,
            config.username,
            config.use_tls
        );
        let mut client = ImapClient::new(config.clone());
        client.open().await?;
        client.login().await?;
        Ok(Box::new(client))
    }
}

#[async_trait]
impl ImapSession for ImapClient {
    async fn list_folders(&mut self) -> ImapResult<Vec<ImapFolder>> {
        self.list("", "*").await
    }

    async fn hierarchy_delimiter(&mut self) -> ImapResult<Option<String>> {
        self.delimiter().await
    }

    async fn status_messages(&mut self, folder: &str) -> ImapResult<u32> {
        self.message_count(folder).await
    }

    async fn examine(&mut self, folder: &str) -> ImapResult<MailboxStatus> {
        ImapClient::examine(self, folder).await
    }

    async fn uid_search_all(&mut self) -> ImapResult<Vec<u32>> {
        self.all_uids().await
    }

    async fn fetch_message(&mut self, uid: u32) -> ImapResult<Option<FetchedMessage>> {
        self.fetch(uid).await
    }

    async fn create_folder(&mut self, folder: &str) -> ImapResult<()> {
        self.create(folder).await
    }

    async fn append(
        &mut self,
        folder: &str,
        flags: &[MessageFlag],
        internal_date: Option<DateTime<FixedOffset>>,
        content: &[u8],
    ) -> ImapResult<()> {
        ImapClient::append(self, folder, flags, internal_date.as_ref(), content).await
    }

    async fn logout(&mut self) -> ImapResult<()> {
        self.close().await
    }

    fn is_connected(&self) -> bool {
        ImapClient::is_connected(self)
    }
}
