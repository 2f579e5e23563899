//! Per-server connection: TCP/TLS stream, line framing, keepalive,
//! reconnect backoff, and the data model the rest of the bot and the
//! control protocol observe and mutate.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::irc::isupport::Isupport;
use crate::limits;

/// Any duplex byte stream the connection can run its line protocol over
/// (plain TCP or a TLS-wrapped TCP stream).
pub trait IrcStream: AsyncRead + AsyncWrite + Unpin {}
impl<T: AsyncRead + AsyncWrite + Unpin> IrcStream for T {}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    WaitingReconnect,
}

#[derive(Clone, Debug, Default)]
pub struct ConnectionOptions {
    pub tls: bool,
    pub tls_verify: bool,
    pub ipv4: bool,
    pub ipv6: bool,
    pub auto_rejoin: bool,
    pub join_invite: bool,
    pub auto_reconnect: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub nickname: String,
    pub username: String,
    pub realname: String,
    pub password: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AutoJoinChannel {
    pub name: String,
    pub key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct Channel {
    pub name: String,
    pub key: Option<String>,
    pub joined: bool,
    /// nickname -> accumulated mode-prefix characters (e.g. `o`, `v`).
    pub users: HashMap<String, Vec<char>>,
}

/// The server data model: identity, credentials, runtime state,
/// channels, ISUPPORT. Shared via `Rc` so in-flight events keep it alive
/// even if a control command removes the server from the bot's registry
/// mid-dispatch.
pub struct ServerState {
    pub id: String,
    pub hostname: String,
    pub port: u16,
    pub options: ConnectionOptions,
    pub credentials: Credentials,
    pub ctcp_version: String,
    pub ctcp_source: String,
    pub command_prefix: String,
    pub autojoin: Vec<AutoJoinChannel>,
    pub state: ConnectionState,
    pub current_nickname: String,
    pub channels: HashMap<String, Channel>,
    pub isupport: Isupport,
    pub names_buffer: HashMap<String, Vec<(String, Vec<char>)>>,
    pub whois_buffer: HashMap<String, crate::irc::event::WhoisEvent>,
}

pub type ServerHandle = Rc<RefCell<ServerState>>;

impl ServerState {
    pub fn new(id: impl Into<String>, hostname: impl Into<String>, port: u16) -> ServerHandle {
        let id = id.into();
        Rc::new(RefCell::new(ServerState {
            id,
            hostname: hostname.into(),
            port,
            options: ConnectionOptions::default(),
            credentials: Credentials::default(),
            ctcp_version: "frippy".to_string(),
            ctcp_source: "https://github.com/frippy-irc/frippy".to_string(),
            command_prefix: "!".to_string(),
            autojoin: Vec::new(),
            state: ConnectionState::Disconnected,
            current_nickname: String::new(),
            channels: HashMap::new(),
            isupport: Isupport::new(),
            names_buffer: HashMap::new(),
            whois_buffer: HashMap::new(),
        }))
    }
}

/// Exponential backoff for reconnect scheduling: starts at 1s, caps at
/// 30s, resets after a sustained connected period.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    current_secs: u64,
    connected_since: Option<Instant>,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            current_secs: limits::BACKOFF_INITIAL_SECS,
            connected_since: None,
        }
    }
}

impl Backoff {
    /// Sustained-connection window after which the backoff resets to the
    /// initial delay.
    const RESET_AFTER: Duration = Duration::from_secs(60);

    pub fn mark_connected(&mut self) {
        self.connected_since = Some(Instant::now());
    }

    /// Returns the delay to wait before the next attempt, then advances
    /// the internal counter (each successive call without an intervening
    /// sustained connection doubles the delay, capped).
    pub fn next_delay(&mut self) -> Duration {
        if let Some(since) = self.connected_since {
            if since.elapsed() >= Self::RESET_AFTER {
                self.current_secs = limits::BACKOFF_INITIAL_SECS;
            }
        }
        self.connected_since = None;

        let delay = Duration::from_secs(self.current_secs);
        self.current_secs = (self.current_secs * 2).min(limits::BACKOFF_MAX_SECS);
        delay
    }
}

/// Splits or truncates `text` so every resulting line fits in
/// [`limits::MESSAGE_LEN`] bytes including the trailing CRLF, for
/// PRIVMSG/NOTICE bodies sent to `target` via `verb`. Other commands are
/// truncated, never split.
pub fn frame_outbound(verb: &str, target: &str, text: &str) -> Vec<String> {
    let prefix = format!("{verb} {target} :");
    let budget = limits::MESSAGE_LEN.saturating_sub(prefix.len() + 2); // +2 for CRLF

    if text.len() <= budget {
        return vec![format!("{prefix}{text}\r\n")];
    }

    if !matches!(verb, "PRIVMSG" | "NOTICE") {
        let mut truncated = text.to_string();
        truncated.truncate(budget);
        tracing::warn!(verb, target, "outbound line truncated to fit the 512-byte limit");
        return vec![format!("{prefix}{truncated}\r\n")];
    }

    let mut lines = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut cut = rest.len().min(budget);
        // Don't split a UTF-8 character in half.
        while cut > 0 && !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            cut = rest.len().min(budget.max(1));
        }
        lines.push(format!("{prefix}{}\r\n", &rest[..cut]));
        rest = &rest[cut..];
    }
    lines
}

/// Bounded inbound line reader: accumulates bytes in a `BUF_LEN`-capped
/// buffer, emitting one [`String`] per CRLF- (leniently LF-) terminated
/// line. A line that would exceed the buffer is a fatal protocol error.
pub struct LineReader {
    buf: BytesMut,
}

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("line exceeded the {0}-byte input buffer")]
    BufferOverflow(usize),
}

impl Default for LineReader {
    fn default() -> Self {
        LineReader {
            buf: BytesMut::with_capacity(8192),
        }
    }
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds newly-read bytes in, returning every complete line found.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<String>, FramingError> {
        self.buf.extend_from_slice(data);
        if self.buf.len() > limits::BUF_LEN {
            return Err(FramingError::BufferOverflow(limits::BUF_LEN));
        }

        let mut lines = Vec::new();
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                break;
            };
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        Ok(lines)
    }
}

/// CTCP request/response encoding: `\x01CMD args\x01`.
pub mod ctcp {
    const MARKER: char = '\u{1}';

    pub fn decode(text: &str) -> Option<(String, Option<String>)> {
        let text = text.strip_prefix(MARKER)?.strip_suffix(MARKER)?;
        match text.split_once(' ') {
            Some((cmd, args)) => Some((cmd.to_ascii_uppercase(), Some(args.to_string()))),
            None => Some((text.to_ascii_uppercase(), None)),
        }
    }

    pub fn encode(cmd: &str, args: Option<&str>) -> String {
        match args {
            Some(a) => format!("{MARKER}{cmd} {a}{MARKER}"),
            None => format!("{MARKER}{cmd}{MARKER}"),
        }
    }

    pub fn is_action(text: &str) -> bool {
        decode(text).map(|(cmd, _)| cmd == "ACTION").unwrap_or(false)
    }

    pub fn action_text(text: &str) -> Option<String> {
        decode(text).and_then(|(cmd, args)| (cmd == "ACTION").then(|| args.unwrap_or_default()))
    }
}

/// Owns the socket and line-level plumbing for one server. The shared,
/// refcounted data model lives in `handle`; this struct is exclusively
/// owned by the bot's connection registry.
pub struct Connection {
    pub handle: ServerHandle,
    stream: Option<Box<dyn IrcStream>>,
    reader: LineReader,
    pub last_activity: Instant,
    pub backoff: Backoff,
}

impl Connection {
    pub fn new(handle: ServerHandle) -> Self {
        Connection {
            handle,
            stream: None,
            reader: LineReader::new(),
            last_activity: Instant::now(),
            backoff: Backoff::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn attach(&mut self, stream: Box<dyn IrcStream>) {
        self.stream = Some(stream);
        self.reader = LineReader::new();
        self.last_activity = Instant::now();
    }

    pub fn detach(&mut self) {
        self.stream = None;
    }

    pub async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream.write_all(line.as_bytes()).await?;
        }
        Ok(())
    }

    /// Reads a chunk from the socket and returns any complete lines.
    /// `Ok(None)` means the peer closed the connection cleanly.
    pub async fn read_lines(&mut self) -> std::io::Result<Option<Vec<String>>> {
        use tokio::io::AsyncReadExt;

        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };

        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        self.last_activity = Instant::now();

        match self.reader.feed(&chunk[..n]) {
            Ok(lines) => Ok(Some(lines)),
            Err(e) => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// Opens the TCP (optionally TLS) stream for `handle`, honoring the
/// connect timeout and ipv4/ipv6 hints.
pub async fn dial(handle: &ServerHandle) -> std::io::Result<Box<dyn IrcStream>> {
    let (host, port, tls, tls_verify) = {
        let s = handle.borrow();
        (s.hostname.clone(), s.port, s.options.tls, s.options.tls_verify)
    };

    let addr = format!("{host}:{port}");
    let connect = tokio::time::timeout(
        Duration::from_secs(limits::CONNECT_TIMEOUT_SECS),
        TcpStream::connect(&addr),
    );

    let tcp = connect
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
    tcp.set_nodelay(true).ok();

    if tls {
        let tls_stream = crate::irc::tls::connect_with_verify(&host, tcp, tls_verify).await?;
        Ok(Box::new(tls_stream))
    } else {
        Ok(Box::new(tcp))
    }
}
