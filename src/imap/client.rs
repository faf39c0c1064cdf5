use crate::imap::connection::ConnectionState;
use crate::imap::{
    FetchedMessage, ImapCapability, ImapConfig, ImapConnection, ImapError, ImapFolder,
    ImapProtocol, ImapResult, MailboxStatus, MessageFlag,
};
use chrono::{DateTime, FixedOffset};

/// Items requested for every message copy
const FETCH_ITEMS: &[&str] = &["UID", "FLAGS", "INTERNALDATE", "BODY.PEEK[]"];

/// How far into the session a command needs us to be
#[derive(Debug, Clone, Copy)]
enum Stage {
    LoggedIn,
    Examined,
}

/// Typed commands on top of a tagged [`ImapConnection`]
pub struct ImapClient {
    conn: ImapConnection,
    capabilities: Vec<ImapCapability>,
}

impl ImapClient {
    pub fn new(config: ImapConfig) -> Self {
        Self::from_connection(ImapConnection::new(config))
    }

    /// Take over a connection whose greeting has already been read
    pub fn from_connection(conn: ImapConnection) -> Self {
        Self {
            conn,
            capabilities: Vec::new(),
        }
    }

    /// Dial the server and learn what it supports before login
    pub async fn open(&mut self) -> ImapResult<()> {
        self.conn.connect().await?;
        self.negotiate().await
    }

    /// Read capabilities on a greeted connection, upgrading a plain one with
    /// STARTTLS when the server offers it
    pub async fn negotiate(&mut self) -> ImapResult<()> {
        self.capabilities = self.query_capabilities().await?;
        if self.conn.config().use_tls || self.conn.is_authenticated() {
            return Ok(());
        }

        let endpoint = self.conn.config().endpoint();
        if self.has_capability(&ImapCapability::StartTls) {
            self.conn.start_tls().await?;
            // What the server said before the upgrade may have been tampered with
            self.capabilities = self.query_capabilities().await?;
        } else {
            tracing::warn!(
                "{} does not offer STARTTLS, credentials will be sent in clear",
                endpoint
            );
        }
        Ok(())
    }

    pub async fn close(&mut self) -> ImapResult<()> {
        self.capabilities.clear();
        self.conn.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn is_logged_in(&self) -> bool {
        self.conn.is_authenticated()
    }

    pub fn capabilities(&self) -> &[ImapCapability] {
        &self.capabilities
    }

    pub fn has_capability(&self, capability: &ImapCapability) -> bool {
        self.capabilities.contains(capability)
    }

    /// LOGIN unless the server forbids it or the credentials cannot be sent
    /// as quoted strings; SASL PLAIN otherwise.
    pub async fn login(&mut self) -> ImapResult<()> {
        if !self.conn.is_connected() {
            return Err(ImapError::invalid_state("login before connect"));
        }
        if self.conn.is_authenticated() {
            return Ok(());
        }

        let username = self.conn.config().username.clone();
        let password = self.conn.config().password.clone();
        let quotable = ImapProtocol::is_quotable(&username) && ImapProtocol::is_quotable(&password);
        let use_login = quotable && !self.has_capability(&ImapCapability::LoginDisabled);

        let outcome = if use_login {
            tracing::debug!("LOGIN as {}", username);
            let command = ImapProtocol::format_login(&username, &password);
            self.conn.send_command(&command).await.map(drop)
        } else if self.has_capability(&ImapCapability::AuthPlain) || !quotable {
            tracing::debug!("AUTHENTICATE PLAIN as {}", username);
            let payload = ImapProtocol::plain_auth_payload(&username, &password);
            self.conn.send_authenticate("PLAIN", &payload).await.map(drop)
        } else {
            return Err(ImapError::authentication(
                "LOGIN is disabled and AUTH=PLAIN is not offered",
            ));
        };

        if let Err(error) = outcome {
            return Err(match error {
                ImapError::Server(line) => ImapError::authentication(line),
                other => other,
            });
        }

        self.conn.set_state(ConnectionState::Authenticated);
        tracing::info!("Logged in as {}", username);

        // The post-login list may differ
        self.capabilities = self.query_capabilities().await?;
        Ok(())
    }

    async fn query_capabilities(&mut self) -> ImapResult<Vec<ImapCapability>> {
        let response = self.conn.send_command("CAPABILITY").await?;
        Ok(ImapProtocol::parse_capabilities(&response))
    }

    fn require(&self, stage: Stage) -> ImapResult<()> {
        let ready = match stage {
            Stage::LoggedIn => self.conn.is_authenticated(),
            Stage::Examined => self.conn.selected_folder().is_some(),
        };
        if ready {
            Ok(())
        } else {
            Err(ImapError::invalid_state(format!(
                "command needs a session that is {:?}",
                stage
            )))
        }
    }

    pub async fn list(&mut self, reference: &str, pattern: &str) -> ImapResult<Vec<ImapFolder>> {
        self.require(Stage::LoggedIn)?;
        let command = ImapProtocol::format_list(reference, pattern);
        let response = self.conn.send_command(&command).await?;
        ImapProtocol::parse_folders(&response)
    }

    /// Separator from the `LIST "" ""` query
    pub async fn delimiter(&mut self) -> ImapResult<Option<String>> {
        let root = self.list("", "").await?;
        Ok(root.into_iter().find_map(|folder| folder.delimiter))
    }

    /// `STATUS <folder> (MESSAGES)`; does not change the selection
    pub async fn message_count(&mut self, folder: &str) -> ImapResult<u32> {
        self.require(Stage::LoggedIn)?;
        let command = ImapProtocol::format_status(folder, &["MESSAGES"]);
        let response = self.conn.send_command(&command).await?;
        ImapProtocol::parse_status(&response)?
            .get("MESSAGES")
            .copied()
            .ok_or_else(|| ImapError::parse("STATUS reply without MESSAGES"))
    }

    /// Read-only selection, so fetching never sets `\Seen`
    pub async fn examine(&mut self, folder: &str) -> ImapResult<MailboxStatus> {
        self.require(Stage::LoggedIn)?;
        let command = ImapProtocol::format_examine(folder);
        let response = self.conn.send_command(&command).await?;
        let status = ImapProtocol::parse_select_response(&response)?;
        self.conn
            .set_state(ConnectionState::Selected(folder.to_string()));
        Ok(status)
    }

    /// Ascending and without repeats
    pub async fn all_uids(&mut self) -> ImapResult<Vec<u32>> {
        self.require(Stage::Examined)?;
        let command = ImapProtocol::format_uid_search("ALL");
        let response = self.conn.send_command(&command).await?;
        let mut uids = ImapProtocol::parse_search_response(&response)?;
        uids.sort_unstable();
        uids.dedup();
        Ok(uids)
    }

    /// `None` when the message was expunged since the search
    pub async fn fetch(&mut self, uid: u32) -> ImapResult<Option<FetchedMessage>> {
        self.require(Stage::Examined)?;
        let command = ImapProtocol::format_uid_fetch(&uid.to_string(), FETCH_ITEMS);
        let response = self.conn.send_command(&command).await?;

        // Unsolicited flag updates for other messages can share the reply
        let found = ImapProtocol::parse_fetch_response(&response)?
            .into_iter()
            .find(|data| data.uid == Some(uid) && data.body.is_some());

        Ok(found.map(|data| FetchedMessage {
            uid,
            flags: data.flags.unwrap_or_default(),
            internal_date: data.internal_date,
            body: data.body.unwrap_or_default(),
        }))
    }

    /// `[ALREADYEXISTS]` is not an error here
    pub async fn create(&mut self, folder: &str) -> ImapResult<()> {
        self.require(Stage::LoggedIn)?;
        let command = ImapProtocol::format_create(folder);
        match self.conn.send_command(&command).await {
            Err(error) if error.has_response_code("ALREADYEXISTS") => {
                tracing::debug!("{} exists already", folder);
                Ok(())
            }
            other => other.map(drop),
        }
    }

    pub async fn append(
        &mut self,
        folder: &str,
        flags: &[MessageFlag],
        internal_date: Option<&DateTime<FixedOffset>>,
        content: &[u8],
    ) -> ImapResult<()> {
        self.require(Stage::LoggedIn)?;
        let command = ImapProtocol::format_append(folder, flags, internal_date, content.len());
        self.conn.send_with_literal(&command, content).await.map(drop)
    }
}
