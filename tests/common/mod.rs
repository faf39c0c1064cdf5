//! In-memory IMAP server used by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use imap_migrator::accounts::{Account, MailboxPair};
use imap_migrator::config::MigratorConfig;
use imap_migrator::imap::{
    FetchedMessage, FolderAttribute, ImapConfig, ImapError, ImapFolder, ImapResult, ImapSession,
    MailboxStatus, MessageFlag, SessionConnector,
};
use imap_migrator::migration::{MigrationEngine, RetryPolicy};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Called with the running count after each successful operation of one kind
pub type CountHook = Box<dyn FnMut(usize) + Send>;

/// How long a stalled `UID FETCH` hangs before answering
pub const STALL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeMessage {
    pub uid: u32,
    pub flags: Vec<MessageFlag>,
    pub internal_date: Option<DateTime<FixedOffset>>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct FakeFolder {
    pub name: String,
    pub attributes: Vec<FolderAttribute>,
    pub uid_validity: u32,
    pub next_uid: u32,
    pub messages: Vec<FakeMessage>,
}

#[derive(Default)]
pub struct ServerState {
    pub delimiter: Option<String>,
    pub folders: Vec<FakeFolder>,
    /// Drop the connection on this many-th operation from now
    pub drop_after: Option<usize>,
    pub refuse_connections: bool,
    /// `UID FETCH` of these uids is answered with NO
    pub failing_fetches: HashSet<u32>,
    /// `APPEND` of a body containing this marker is answered with NO
    pub rejected_marker: Option<Vec<u8>>,
    pub append_hook: Option<CountHook>,
    pub fetch_hook: Option<CountHook>,
    /// Every `STATUS` takes this long
    pub status_delay: Option<Duration>,
    /// The next this many `UID FETCH` commands hang for [`STALL`]
    pub stalled_fetches: usize,
    pub connects: usize,
    pub statuses: usize,
    pub fetches: usize,
    pub appends: usize,
    pub creates: Vec<String>,
}

/// A shared mailbox that any number of sessions can talk to
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new(delimiter: &str) -> Self {
        let server = Self::default();
        server.with(|state| state.delimiter = Some(delimiter.to_string()));
        server.add_folder("INBOX", vec![]);
        server
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn add_folder(&self, name: &str, attributes: Vec<FolderAttribute>) {
        self.with(|state| {
            if state.folders.iter().any(|f| f.name == name) {
                return;
            }
            state.folders.push(FakeFolder {
                name: name.to_string(),
                attributes,
                uid_validity: 1000 + state.folders.len() as u32,
                next_uid: 1,
                messages: Vec::new(),
            });
        });
    }

    pub fn add_message(
        &self,
        folder: &str,
        body: &str,
        flags: Vec<MessageFlag>,
        internal_date: Option<&str>,
    ) -> u32 {
        let internal_date =
            internal_date.map(|date| DateTime::parse_from_rfc3339(date).unwrap());
        self.with(|state| {
            let folder = state
                .folders
                .iter_mut()
                .find(|f| f.name == folder)
                .unwrap();
            let uid = folder.next_uid;
            folder.next_uid += 1;
            folder.messages.push(FakeMessage {
                uid,
                flags,
                internal_date,
                body: body.as_bytes().to_vec(),
            });
            uid
        })
    }

    pub fn folder_names(&self) -> Vec<String> {
        self.with(|state| state.folders.iter().map(|f| f.name.clone()).collect())
    }

    pub fn messages(&self, folder: &str) -> Vec<FakeMessage> {
        self.with(|state| {
            state
                .folders
                .iter()
                .find(|f| f.name == folder)
                .map(|f| f.messages.clone())
                .unwrap_or_default()
        })
    }

    pub fn bodies(&self, folder: &str) -> Vec<String> {
        let mut bodies: Vec<String> = self
            .messages(folder)
            .into_iter()
            .map(|m| String::from_utf8(m.body).unwrap())
            .collect();
        bodies.sort();
        bodies
    }

    pub fn fetches(&self) -> usize {
        self.with(|state| state.fetches)
    }

    pub fn appends(&self) -> usize {
        self.with(|state| state.appends)
    }

    pub fn statuses(&self) -> usize {
        self.with(|state| state.statuses)
    }

    pub fn connects(&self) -> usize {
        self.with(|state| state.connects)
    }
}

/// Routes connections to fake servers by hostname
#[derive(Clone, Default)]
pub struct FakeConnector {
    servers: HashMap<String, FakeServer>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, host: &str, server: &FakeServer) -> Self {
        self.servers.insert(host.to_string(), server.clone());
        self
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self, config: &ImapConfig) -> ImapResult<Box<dyn ImapSession>> {
        let server = self
            .servers
            .get(&config.hostname)
            .ok_or_else(|| ImapError::connection(format!("unknown host {}", config.hostname)))?
            .clone();
        let refused = server.with(|state| {
            state.connects += 1;
            state.refuse_connections
        });
        if refused {
            return Err(ImapError::connection("connection refused"));
        }
        Ok(Box::new(FakeSession {
            server,
            selected: None,
            connected: true,
        }))
    }
}

pub struct FakeSession {
    server: FakeServer,
    selected: Option<String>,
    connected: bool,
}

impl FakeSession {
    /// Every operation goes through here so a drop can be injected anywhere
    fn begin(&mut self) -> ImapResult<()> {
        if !self.connected {
            return Err(ImapError::connection("not connected"));
        }
        let dropped = self.server.with(|state| match state.drop_after {
            Some(0) | Some(1) => {
                state.drop_after = None;
                true
            }
            Some(n) => {
                state.drop_after = Some(n - 1);
                false
            }
            None => false,
        });
        if dropped {
            self.connected = false;
            return Err(ImapError::connection("connection reset by peer"));
        }
        Ok(())
    }
}

#[async_trait]
impl ImapSession for FakeSession {
    async fn list_folders(&mut self) -> ImapResult<Vec<ImapFolder>> {
        self.begin()?;
        Ok(self.server.with(|state| {
            state
                .folders
                .iter()
                .map(|f| {
                    let mut folder = ImapFolder::new(f.name.clone());
                    folder.delimiter = state.delimiter.clone();
                    folder.attributes = f.attributes.clone();
                    folder
                })
                .collect()
        }))
    }

    async fn hierarchy_delimiter(&mut self) -> ImapResult<Option<String>> {
        self.begin()?;
        Ok(self.server.with(|state| state.delimiter.clone()))
    }

    async fn status_messages(&mut self, folder: &str) -> ImapResult<u32> {
        self.begin()?;
        let delay = self.server.with(|state| state.status_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.server.with(|state| {
            state.statuses += 1;
            state
                .folders
                .iter()
                .find(|f| f.name == folder)
                .map(|f| f.messages.len() as u32)
                .ok_or_else(|| ImapError::server("A1 NO [NONEXISTENT] no such folder"))
        })
    }

    async fn examine(&mut self, folder: &str) -> ImapResult<MailboxStatus> {
        self.begin()?;
        let status = self.server.with(|state| {
            state
                .folders
                .iter()
                .find(|f| f.name == folder)
                .map(|f| MailboxStatus {
                    exists: f.messages.len() as u32,
                    uid_validity: Some(f.uid_validity),
                    uid_next: Some(f.next_uid),
                })
                .ok_or_else(|| ImapError::server("A1 NO [NONEXISTENT] no such folder"))
        })?;
        self.selected = Some(folder.to_string());
        Ok(status)
    }

    async fn uid_search_all(&mut self) -> ImapResult<Vec<u32>> {
        self.begin()?;
        let selected = self
            .selected
            .clone()
            .ok_or_else(|| ImapError::invalid_state("no folder selected"))?;
        Ok(self
            .server
            .messages(&selected)
            .iter()
            .map(|m| m.uid)
            .collect())
    }

    async fn fetch_message(&mut self, uid: u32) -> ImapResult<Option<FetchedMessage>> {
        self.begin()?;
        let selected = self
            .selected
            .clone()
            .ok_or_else(|| ImapError::invalid_state("no folder selected"))?;
        let stalled = self.server.with(|state| {
            let stalled = state.stalled_fetches > 0;
            state.stalled_fetches = state.stalled_fetches.saturating_sub(1);
            stalled
        });
        if stalled {
            tokio::time::sleep(STALL).await;
        }
        let (fetches, failing) = self.server.with(|state| {
            state.fetches += 1;
            (state.fetches, state.failing_fetches.contains(&uid))
        });
        if failing {
            return Err(ImapError::server("A1 NO [UNAVAILABLE] message cannot be read"));
        }
        let fetched = self
            .server
            .messages(&selected)
            .into_iter()
            .find(|m| m.uid == uid)
            .map(|m| FetchedMessage {
                uid: m.uid,
                flags: m.flags,
                internal_date: m.internal_date,
                body: m.body,
            });

        let hook = self.server.with(|state| state.fetch_hook.take());
        if let Some(mut hook) = hook {
            hook(fetches);
            self.server.with(|state| state.fetch_hook = Some(hook));
        }
        Ok(fetched)
    }

    async fn create_folder(&mut self, folder: &str) -> ImapResult<()> {
        self.begin()?;
        self.server
            .with(|state| state.creates.push(folder.to_string()));
        self.server.add_folder(folder, vec![]);
        Ok(())
    }

    async fn append(
        &mut self,
        folder: &str,
        flags: &[MessageFlag],
        internal_date: Option<DateTime<FixedOffset>>,
        content: &[u8],
    ) -> ImapResult<()> {
        self.begin()?;
        let result = self.server.with(|state| {
            if let Some(marker) = &state.rejected_marker {
                if content.windows(marker.len()).any(|w| w == marker.as_slice()) {
                    return Err(ImapError::server("A1 NO [LIMIT] message rejected"));
                }
            }
            let target = state
                .folders
                .iter_mut()
                .find(|f| f.name == folder)
                .ok_or_else(|| ImapError::server("A1 NO [TRYCREATE] no such folder"))?;
            let uid = target.next_uid;
            target.next_uid += 1;
            target.messages.push(FakeMessage {
                uid,
                flags: flags.to_vec(),
                internal_date,
                body: content.to_vec(),
            });
            state.appends += 1;
            Ok(state.appends)
        });
        let appends = result?;
        let hook = self.server.with(|state| state.append_hook.take());
        if let Some(mut hook) = hook {
            hook(appends);
            self.server.with(|state| state.append_hook = Some(hook));
        }
        Ok(())
    }

    async fn logout(&mut self) -> ImapResult<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

pub fn account(username: &str, host: &str) -> Account {
    Account {
        username: username.to_string(),
        password: "secret".to_string(),
        host: host.to_string(),
        port: 993,
        use_ssl: true,
    }
}

pub fn pair(label: &str) -> MailboxPair {
    MailboxPair {
        label: label.to_string(),
        source: account(label, "old.example.com"),
        destination: account(label, "new.example.com"),
    }
}

/// Retries without real waiting, each operation given `timeout`
pub fn policy_with_timeout(timeout: Duration) -> RetryPolicy {
    RetryPolicy {
        operation_timeout: timeout,
        ..fast_policy()
    }
}

/// Retries without real waiting
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter_enabled: false,
        operation_timeout: Duration::from_secs(5),
    }
}

/// A source and a destination server plus a scratch output directory
pub struct Harness {
    pub source: FakeServer,
    pub destination: FakeServer,
    pub dir: TempDir,
    pub config: MigratorConfig,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = MigratorConfig::default();
        config.run.output = dir.path().join("backups");
        Self {
            source: FakeServer::new("/"),
            destination: FakeServer::new("."),
            dir,
            config,
        }
    }

    pub fn connector(&self) -> Arc<FakeConnector> {
        Arc::new(
            FakeConnector::new()
                .with_server("old.example.com", &self.source)
                .with_server("new.example.com", &self.destination),
        )
    }

    /// A fresh engine, as a new process would build it
    pub fn engine(&self) -> MigrationEngine {
        MigrationEngine::new(self.config.clone(), self.connector())
            .unwrap()
            .with_policy(fast_policy())
    }
}
