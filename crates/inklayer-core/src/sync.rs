//! WebSocket client for the relay.
//!
//! The socket lives on a background thread. Commands go in over one channel,
//! [`ClientEvent`]s come back over another and are drained with
//! [`NativeWebSocket::poll_events`]. Lost connections are retried according
//! to a [`ReconnectPolicy`].

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tungstenite::{Message, connect};
use url::Url;

/// Errors from the client handle itself; network failures arrive as events.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Invalid WebSocket URL scheme: {0}")]
    InvalidScheme(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Connection thread has exited")]
    ChannelClosed,
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

/// Events from the WebSocket client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Connected (or reconnected) to the relay
    Connected,
    /// Connection closed and no further attempts will be made
    Disconnected,
    /// Waiting `delay` before reconnect attempt number `attempt`
    Reconnecting { attempt: u32, delay: Duration },
    /// A text frame from the relay
    Message(String),
    /// Error occurred
    Error { message: String },
}

/// Exponential backoff for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts before giving up; 0 disables reconnect.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    /// Never reconnect.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before the given 1-based attempt, doubling each time up to
    /// `max_backoff`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Check that `url` is a ws:// or wss:// URL.
pub fn validate_url(url: &str) -> ClientResult<Url> {
    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(ClientError::InvalidScheme(other.to_string())),
    }
}

/// Commands sent to the WebSocket thread.
enum WsCommand {
    Send(String),
    Close,
}

/// How a live connection ended.
enum SessionEnd {
    /// Closed on request, or the handle was dropped.
    Requested,
    Lost,
}

/// WebSocket client for native platforms.
///
/// Uses a background thread for non-blocking operation.
pub struct NativeWebSocket {
    state: ConnectionState,
    policy: ReconnectPolicy,
    events: Vec<ClientEvent>,
    /// Channel to send commands to the WebSocket thread.
    cmd_tx: Option<Sender<WsCommand>>,
    /// Channel to receive events from the WebSocket thread.
    event_rx: Option<Receiver<ClientEvent>>,
    /// Handle to the WebSocket thread.
    _thread: Option<JoinHandle<()>>,
}

impl NativeWebSocket {
    /// Create a new disconnected WebSocket client.
    pub fn new() -> Self {
        Self::with_policy(ReconnectPolicy::default())
    }

    pub fn with_policy(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            events: Vec::new(),
            cmd_tx: None,
            event_rx: None,
            _thread: None,
        }
    }

    /// Connect to a WebSocket server.
    pub fn connect(&mut self, url: &str) -> ClientResult<()> {
        if self.cmd_tx.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        let url = validate_url(url)?.to_string();

        self.state = ConnectionState::Connecting;

        let (cmd_tx, cmd_rx) = channel::<WsCommand>();
        let (event_tx, event_rx) = channel::<ClientEvent>();
        let policy = self.policy;

        let handle = thread::spawn(move || run_connection(&url, policy, &cmd_rx, &event_tx));

        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self._thread = Some(handle);

        Ok(())
    }

    /// Disconnect from the server.
    pub fn disconnect(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WsCommand::Close);
        }
        self.event_rx = None;
        self._thread = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Send a text message.
    pub fn send(&self, msg: &str) -> ClientResult<()> {
        let tx = self.cmd_tx.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(WsCommand::Send(msg.to_string()))
            .map_err(|_| ClientError::ChannelClosed)
    }

    /// Poll for pending events (non-blocking).
    pub fn poll_events(&mut self) -> Vec<ClientEvent> {
        if let Some(ref rx) = self.event_rx {
            while let Ok(event) = rx.try_recv() {
                match &event {
                    ClientEvent::Connected => self.state = ConnectionState::Connected,
                    ClientEvent::Disconnected => self.state = ConnectionState::Disconnected,
                    ClientEvent::Reconnecting { .. } => self.state = ConnectionState::Reconnecting,
                    ClientEvent::Error { .. } => self.state = ConnectionState::Error,
                    ClientEvent::Message(_) => {}
                }
                self.events.push(event);
            }
        }

        std::mem::take(&mut self.events)
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }
}

impl Default for NativeWebSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NativeWebSocket {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Body of the background thread: connect, pump, and retry on loss.
fn run_connection(
    url: &str,
    policy: ReconnectPolicy,
    cmd_rx: &Receiver<WsCommand>,
    event_tx: &Sender<ClientEvent>,
) {
    let mut attempt = 0u32;
    loop {
        log::info!("WebSocket thread: connecting to {}", url);
        match connect(url) {
            Ok((mut socket, response)) => {
                log::info!("WebSocket connected, status: {}", response.status());
                attempt = 0;
                let _ = event_tx.send(ClientEvent::Connected);

                if let tungstenite::stream::MaybeTlsStream::Plain(tcp) = socket.get_mut() {
                    let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
                    let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
                }

                if let SessionEnd::Requested = pump(&mut socket, cmd_rx, event_tx) {
                    log::info!("WebSocket thread exiting");
                    let _ = event_tx.send(ClientEvent::Disconnected);
                    return;
                }
                log::warn!("WebSocket connection lost");
            }
            Err(e) => {
                log::error!("WebSocket connection failed: {}", e);
                let _ = event_tx.send(ClientEvent::Error {
                    message: format!("Connection failed: {}", e),
                });
            }
        }

        attempt += 1;
        if !policy.allows(attempt) {
            log::info!("Giving up on {} after {} attempts", url, attempt - 1);
            let _ = event_tx.send(ClientEvent::Disconnected);
            return;
        }
        let delay = policy.delay(attempt);
        let _ = event_tx.send(ClientEvent::Reconnecting { attempt, delay });
        if !wait_for_retry(delay, cmd_rx) {
            let _ = event_tx.send(ClientEvent::Disconnected);
            return;
        }
    }
}

type Socket = tungstenite::WebSocket<tungstenite::stream::MaybeTlsStream<std::net::TcpStream>>;

fn pump(socket: &mut Socket, cmd_rx: &Receiver<WsCommand>, event_tx: &Sender<ClientEvent>) -> SessionEnd {
    loop {
        // Drain every queued command before blocking on a read.
        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(msg)) => {
                    log::debug!("WebSocket sending: {}", preview(&msg));
                    if let Err(e) = socket.send(Message::Text(msg)) {
                        log::error!("WebSocket send error: {}", e);
                        return SessionEnd::Lost;
                    }
                }
                Ok(WsCommand::Close) => {
                    log::info!("WebSocket close requested");
                    let _ = socket.close(None);
                    let _ = socket.flush();
                    return SessionEnd::Requested;
                }
                Err(TryRecvError::Disconnected) => {
                    log::info!("WebSocket command channel disconnected");
                    let _ = socket.close(None);
                    return SessionEnd::Requested;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.read() {
            Ok(Message::Text(txt)) => {
                log::debug!("WebSocket received: {}", preview(&txt));
                if event_tx.send(ClientEvent::Message(txt)).is_err() {
                    return SessionEnd::Requested;
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = socket.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                log::info!("WebSocket received close frame");
                return SessionEnd::Lost;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                log::error!("WebSocket read error: {}", e);
                return SessionEnd::Lost;
            }
        }
    }
}

/// First 100 characters of a frame, for logging.
fn preview(text: &str) -> &str {
    match text.char_indices().nth(100) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Sleep out the backoff while still honoring close requests.
/// Returns false if the client asked to stop.
fn wait_for_retry(delay: Duration, cmd_rx: &Receiver<WsCommand>) -> bool {
    let deadline = std::time::Instant::now() + delay;
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        match cmd_rx.recv_timeout(remaining) {
            Ok(WsCommand::Send(_)) => {
                log::warn!("Dropping outbound message while reconnecting");
            }
            Ok(WsCommand::Close) | Err(RecvTimeoutError::Disconnected) => return false,
            Err(RecvTimeoutError::Timeout) => return true,
        }
    }
}
