use crate::imap::{ImapConfig, ImapError, ImapResult, ImapSession, SessionConnector};
use crate::migration::retry::RetryPolicy;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A session to one side of a pair that can be re-opened after it drops
pub(crate) struct Link {
    connector: Arc<dyn SessionConnector>,
    config: ImapConfig,
    role: &'static str,
    session: Option<Box<dyn ImapSession>>,
    /// Wire name to re-select after reconnecting
    selected: Option<String>,
}

impl Link {
    /// Connect, retrying recoverable failures
    pub async fn open(
        connector: Arc<dyn SessionConnector>,
        config: ImapConfig,
        role: &'static str,
        policy: &RetryPolicy,
    ) -> ImapResult<Self> {
        let mut link = Self {
            connector,
            config,
            role,
            session: None,
            selected: None,
        };

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match link.reconnect(policy).await {
                Ok(()) => {
                    info!("Connected to {}", link.describe());
                    return Ok(link);
                }
                Err(error) if error.is_recoverable() && attempt < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        "Connecting to {} failed (attempt {}/{}): {}, retrying in {:?}",
                        link.describe(),
                        attempt,
                        policy.max_attempts,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    pub fn describe(&self) -> String {
        format!("{} {}", self.role, self.config.endpoint())
    }

    pub fn session_mut(&mut self) -> Option<&mut (dyn ImapSession + 'static)> {
        self.session.as_deref_mut()
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().map(|s| s.is_connected()).unwrap_or(false)
    }

    /// Forget a session whose stream can no longer be trusted
    pub fn invalidate(&mut self) {
        if self.session.take().is_some() {
            debug!("Dropping session to {}", self.describe());
        }
    }

    pub fn set_selected(&mut self, wire_name: &str) {
        self.selected = Some(wire_name.to_string());
    }

    pub fn clear_selected(&mut self) {
        self.selected = None;
    }

    /// Open a fresh session and restore the selection
    pub async fn reconnect(&mut self, policy: &RetryPolicy) -> ImapResult<()> {
        self.session = None;
        let connect = self.connector.connect(&self.config);
        let mut session = tokio::time::timeout(policy.operation_timeout, connect)
            .await
            .map_err(|_| ImapError::Timeout)??;

        if let Some(folder) = &self.selected {
            tokio::time::timeout(policy.operation_timeout, session.examine(folder))
                .await
                .map_err(|_| ImapError::Timeout)??;
        }

        self.session = Some(session);
        Ok(())
    }

    /// After an operation gave up, check whether the peer is still usable
    pub async fn ensure_connected(&mut self, policy: &RetryPolicy) -> bool {
        if self.is_connected() {
            return true;
        }
        match self.reconnect(policy).await {
            Ok(()) => true,
            Err(error) => {
                warn!("{} is unreachable: {}", self.describe(), error);
                false
            }
        }
    }

    pub async fn close(mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(error) = session.logout().await {
                debug!("Logout from {} failed: {}", self.describe(), error);
            }
        }
    }
}
