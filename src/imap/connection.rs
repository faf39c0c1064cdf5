use crate::archive::record::MAX_BODY_LEN;
use crate::imap::{ImapConfig, ImapError, ImapResult, ResponseLine};
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
    BufReader as AsyncBufReader,
};
use tokio::net::TcpStream as AsyncTcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

/// Up-front allocation for a literal; larger ones grow as bytes arrive
const LITERAL_PREALLOC: usize = 1 << 20;

/// Any byte stream a session can run over
trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

type Stream = AsyncBufReader<Box<dyn Transport>>;

/// Where the session is in the IMAP state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Greeted, not logged in
    Connected,
    Authenticated,
    /// Holds the wire name of the examined folder
    Selected(String),
}

/// One tagged-command stream to a server: plain TCP, implicit TLS, or plain
/// TCP upgraded with STARTTLS
pub struct ImapConnection {
    config: ImapConfig,
    state: ConnectionState,
    stream: Option<Stream>,
    tag_counter: u32,
}

fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(client_config))
}

impl ImapConnection {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            stream: None,
            tag_counter: 0,
        }
    }

    fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }

    /// Dial `hostname:port`, wrap in TLS when configured, read the greeting
    pub async fn connect(&mut self) -> ImapResult<()> {
        if self.is_connected() {
            return Err(ImapError::invalid_state("connect on a live session"));
        }

        let endpoint = self.config.endpoint();
        let limit = self.io_timeout();
        tracing::debug!("Dialing {} (tls: {})", endpoint, self.config.use_tls);

        let host = self.config.hostname.clone();
        let dial = AsyncTcpStream::connect((host.as_str(), self.config.port));
        let tcp = match timeout(limit, dial).await {
            Err(_) => {
                tracing::warn!("No answer from {} within {:?}", endpoint, limit);
                return Err(ImapError::Timeout);
            }
            Ok(Err(e)) => return Err(ImapError::connection(format!("{}: {}", endpoint, e))),
            Ok(Ok(tcp)) => tcp,
        };

        if !self.config.use_tls {
            self.attach(tcp);
            return self.read_greeting().await;
        }

        let server_name = rustls::pki_types::ServerName::try_from(host)
            .map_err(|e| ImapError::tls(format!("{} is not a valid TLS name: {}", endpoint, e)))?;
        let tls = timeout(limit, tls_connector().connect(server_name, tcp))
            .await
            .map_err(|_| ImapError::Timeout)?
            .map_err(|e| ImapError::tls(format!("handshake with {}: {}", endpoint, e)))?;
        self.attach(tls);
        self.read_greeting().await
    }

    /// Run the protocol over an already established byte stream
    pub async fn connect_stream<S>(&mut self, stream: S) -> ImapResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if self.is_connected() {
            return Err(ImapError::invalid_state("connect on a live session"));
        }
        self.attach(stream);
        self.read_greeting().await
    }

    fn attach<S>(&mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let transport: Box<dyn Transport> = Box::new(stream);
        self.stream = Some(AsyncBufReader::new(transport));
    }

    /// Upgrade a plain session to TLS. Only valid before login.
    pub async fn start_tls(&mut self) -> ImapResult<()> {
        if self.state != ConnectionState::Connected {
            return Err(ImapError::invalid_state("STARTTLS outside the not-authenticated state"));
        }
        self.send_command("STARTTLS").await?;

        let stream = self
            .stream
            .take()
            .ok_or_else(|| ImapError::invalid_state("STARTTLS without a stream"))?;
        // Anything already buffered was sent in clear and must not be trusted
        if !stream.buffer().is_empty() {
            self.state = ConnectionState::Disconnected;
            return Err(ImapError::protocol("server sent data before the TLS handshake"));
        }

        let endpoint = self.config.endpoint();
        let upgraded = match rustls::pki_types::ServerName::try_from(self.config.hostname.clone()) {
            Ok(server_name) => {
                let handshake = tls_connector().connect(server_name, stream.into_inner());
                match timeout(self.io_timeout(), handshake).await {
                    Ok(Ok(tls)) => Ok(tls),
                    Ok(Err(e)) => Err(ImapError::tls(format!("handshake with {}: {}", endpoint, e))),
                    Err(_) => Err(ImapError::Timeout),
                }
            }
            Err(e) => Err(ImapError::tls(format!(
                "{} is not a valid TLS name: {}",
                endpoint, e
            ))),
        };

        match upgraded {
            Ok(tls) => {
                tracing::debug!("STARTTLS negotiated with {}", endpoint);
                self.attach(tls);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn read_greeting(&mut self) -> ImapResult<()> {
        let greeting = match self.read_response().await {
            Ok(line) => line.text,
            Err(e) => return Err(self.drop_stream(e)),
        };

        let upper = greeting.to_ascii_uppercase();
        if upper.starts_with("* PREAUTH") {
            self.state = ConnectionState::Authenticated;
        } else if upper.starts_with("* OK") {
            self.state = ConnectionState::Connected;
        } else {
            self.stream = None;
            return Err(ImapError::connection(format!("not an IMAP greeting: {}", greeting)));
        }

        self.tag_counter = 0;
        tracing::debug!("Greeting: {}", greeting);
        Ok(())
    }

    /// LOGOUT if still possible, then forget the stream
    pub async fn disconnect(&mut self) -> ImapResult<()> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }

        if let Err(e) = self.send_command("LOGOUT").await {
            tracing::debug!("Ignoring LOGOUT failure: {}", e);
        }

        self.stream = None;
        self.state = ConnectionState::Disconnected;

        Ok(())
    }

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{:04}", self.tag_counter)
    }

    /// Send a tagged command and collect every response up to its completion
    pub async fn send_command(&mut self, command: &str) -> ImapResult<Vec<ResponseLine>> {
        let tag = self.next_tag();
        let verb = command.split(' ').next().unwrap_or(command).to_string();
        self.write_line(&format!("{} {}\r\n", tag, command)).await?;
        self.read_until_tagged(&tag, &verb).await
    }

    /// Send a command whose last argument is a synchronizing literal
    /// (`APPEND ... {n}`), transmitting `literal` once the server asks for it
    pub async fn send_with_literal(
        &mut self,
        command: &str,
        literal: &[u8],
    ) -> ImapResult<Vec<ResponseLine>> {
        let tag = self.next_tag();
        let verb = command.split(' ').next().unwrap_or(command).to_string();
        self.write_line(&format!("{} {}\r\n", tag, command)).await?;

        let mut responses = Vec::new();
        loop {
            let line = self.read_response_checked().await?;
            if line.text.starts_with('+') {
                break;
            }
            if let Some(result) = Self::tagged_result(&tag, &verb, &line) {
                // Server refused before accepting the literal
                result?;
                return Ok(responses);
            }
            responses.push(line);
        }

        let mut payload = Vec::with_capacity(literal.len() + 2);
        payload.extend_from_slice(literal);
        payload.extend_from_slice(b"\r\n");
        self.write_raw(&payload).await?;

        responses.extend(self.read_until_tagged(&tag, &verb).await?);
        Ok(responses)
    }

    /// Send AUTHENTICATE with a single client response
    pub async fn send_authenticate(
        &mut self,
        mechanism: &str,
        auth_data: &str,
    ) -> ImapResult<Vec<ResponseLine>> {
        let tag = self.next_tag();
        self.write_line(&format!("{} AUTHENTICATE {}\r\n", tag, mechanism))
            .await?;

        let continuation = self.read_response_checked().await?;
        if let Some(result) = Self::tagged_result(&tag, "AUTHENTICATE", &continuation) {
            result?;
            return Ok(vec![continuation]);
        }
        if !continuation.text.starts_with('+') {
            return Err(ImapError::protocol(format!(
                "Expected continuation response, got: {}",
                continuation.text
            )));
        }

        self.write_line(&format!("{}\r\n", auth_data)).await?;

        match self.read_until_tagged(&tag, "AUTHENTICATE").await {
            Err(ImapError::Server(msg)) => Err(ImapError::authentication(msg)),
            other => other,
        }
    }

    async fn read_until_tagged(&mut self, tag: &str, verb: &str) -> ImapResult<Vec<ResponseLine>> {
        let mut responses = Vec::new();
        loop {
            let line = self.read_response_checked().await?;

            if let Some(result) = Self::tagged_result(tag, verb, &line) {
                result?;
                return Ok(responses);
            }

            if line.text.len() >= 5 && line.text[..5].eq_ignore_ascii_case("* BYE") {
                if verb.eq_ignore_ascii_case("LOGOUT") {
                    responses.push(line);
                    continue;
                }
                return Err(self.drop_stream(ImapError::connection(format!(
                    "Server closed the session: {}",
                    line.text
                ))));
            }

            responses.push(line);
        }
    }

    /// Map a tagged completion line onto a result, or `None` if it is not ours
    fn tagged_result(tag: &str, verb: &str, line: &ResponseLine) -> Option<ImapResult<()>> {
        let rest = line.text.strip_prefix(tag)?.strip_prefix(' ')?;
        let status = rest.split(' ').next().unwrap_or("").to_ascii_uppercase();
        Some(match status.as_str() {
            "OK" => Ok(()),
            "NO" => Err(ImapError::server(format!("{} failed: {}", verb, line.text))),
            "BAD" => Err(ImapError::protocol(format!("Bad {} command: {}", verb, line.text))),
            _ => Err(ImapError::protocol(format!(
                "Unexpected tagged response: {}",
                line.text
            ))),
        })
    }

    /// Read one response, dropping the stream on transport failures
    async fn read_response_checked(&mut self) -> ImapResult<ResponseLine> {
        match self.read_response().await {
            Ok(line) => Ok(line),
            Err(e) => Err(self.drop_stream(e)),
        }
    }

    /// One logical response; literals are pulled out into `literals` and the
    /// text keeps only the `{n}` markers
    async fn read_response(&mut self) -> ImapResult<ResponseLine> {
        let mut response = ResponseLine::default();

        loop {
            let line = self.read_physical_line().await?;
            let line = String::from_utf8_lossy(&line).into_owned();
            let literal_size = Self::extract_literal_size(&line);
            response.text.push_str(&line);

            match literal_size {
                Some(size) => {
                    tracing::trace!("Reading literal of {} bytes", size);
                    let literal = self.read_literal(size).await?;
                    response.literals.push(literal);
                }
                None => return Ok(response),
            }
        }
    }

    async fn read_physical_line(&mut self) -> ImapResult<Vec<u8>> {
        let limit = self.io_timeout();
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ImapError::invalid_state("read without a stream"))?;

        let mut line = Vec::new();
        let read = timeout(limit, stream.read_until(b'\n', &mut line))
            .await
            .map_err(|_| ImapError::Timeout)??;
        if read == 0 {
            return Err(ImapError::connection("server closed the stream"));
        }

        let trimmed = line
            .strip_suffix(b"\r\n")
            .or_else(|| line.strip_suffix(b"\n"))
            .map_or(line.len(), <[u8]>::len);
        line.truncate(trimmed);
        Ok(line)
    }

    async fn read_literal(&mut self, size: usize) -> ImapResult<Vec<u8>> {
        if size as u64 > MAX_BODY_LEN {
            // The literal is left unread, so the stream cannot be used again
            self.stream = None;
            self.state = ConnectionState::Disconnected;
            return Err(ImapError::protocol(format!(
                "literal of {} bytes is over the {} byte limit",
                size, MAX_BODY_LEN
            )));
        }

        let limit = self.io_timeout();
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ImapError::invalid_state("read without a stream"))?;

        let mut octets = Vec::with_capacity(size.min(LITERAL_PREALLOC));
        let read = timeout(limit, stream.take(size as u64).read_to_end(&mut octets))
            .await
            .map_err(|_| ImapError::Timeout)??;
        if read < size {
            return Err(ImapError::connection("server closed the stream inside a literal"));
        }
        Ok(octets)
    }

    /// `{n}` or `{n+}` at the very end of a line announces a literal
    fn extract_literal_size(line: &str) -> Option<usize> {
        let body = line.strip_suffix('}')?;
        let start = body.rfind('{')?;
        body[start + 1..].trim_end_matches('+').parse().ok()
    }

    async fn write_line(&mut self, line: &str) -> ImapResult<()> {
        self.write_raw(line.as_bytes()).await
    }

    async fn write_raw(&mut self, data: &[u8]) -> ImapResult<()> {
        let limit = self.io_timeout();
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ImapError::invalid_state("write without a stream"))?;

        let result = timeout(limit, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.drop_stream(ImapError::Io(e))),
            Err(_) => Err(self.drop_stream(ImapError::Timeout)),
        }
    }

    /// A transport failure leaves the stream in an unknown position; forget it.
    fn drop_stream(&mut self, error: ImapError) -> ImapError {
        if error.is_connection_error() {
            self.stream = None;
            self.state = ConnectionState::Disconnected;
        }
        error
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state != ConnectionState::Disconnected
    }

    /// True in both the authenticated and the selected state
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Authenticated | ConnectionState::Selected(_)
        )
    }

    pub fn selected_folder(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Selected(folder) => Some(folder),
            _ => None,
        }
    }

    /// No-op once the stream is gone, so a late state change cannot revive it
    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        if self.is_connected() {
            self.state = state;
        }
    }

    pub fn config(&self) -> &ImapConfig {
        &self.config
    }
}
