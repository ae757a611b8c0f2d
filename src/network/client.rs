//! KeyBridge Client
//!
//! The long-lived object callers talk to. Holds the current session and the
//! reconnection policy, serializes every protocol operation and reports
//! progress as human-readable log lines.

use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};

use super::{
    keyevent_command, run_shell_command, Endpoint, ExecError, ExecResult, NetworkConfig,
    ReconnectError, ReconnectPolicy, RetryEvent, Session, TransportError, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_RETRY_DELAY,
};
use crate::keys::KeyCode;
use crate::protocol::PeerInfo;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Session settings
    pub network: NetworkConfig,
    /// Attempts per reconnection run
    pub max_attempts: u32,
    /// Delay between two connection attempts
    pub retry_delay: Duration,
    /// Deadline for one whole command, `None` to rely on socket timeouts only
    pub operation_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            operation_timeout: None,
        }
    }
}

/// Events emitted by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A line for display
    Log(String),
    /// Connection state changed
    StateChanged(ClientState),
}

/// Client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    /// Retries exhausted; only an explicit connect leaves this state
    Unavailable,
}

struct Inner {
    endpoint: Option<Endpoint>,
    session: Option<Session>,
    policy: ReconnectPolicy,
    /// Set while a command runs; still set afterwards if its future was dropped
    in_flight: bool,
}

/// Flags the client disconnected if an operation is dropped before it ends
struct CancelGuard<'a> {
    client: &'a Client,
    armed: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut state) = self.client.state.try_write() {
            if *state == ClientState::Connected {
                tracing::debug!("Command cancelled, session will be closed");
                *state = ClientState::Disconnected;
                self.client
                    .emit(ClientEvent::StateChanged(ClientState::Disconnected));
            }
        }
    }
}

/// KeyBridge Client
pub struct Client {
    /// Client configuration
    config: ClientConfig,
    /// Session and retry state, locked for the length of each operation
    inner: Mutex<Inner>,
    /// Current state
    state: RwLock<ClientState>,
    /// Device identity (after connection)
    peer: RwLock<Option<PeerInfo>>,
    /// Event sender
    event_tx: mpsc::Sender<ClientEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
}

impl Client {
    /// Create a new client
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        let policy = ReconnectPolicy::new(config.max_attempts, config.retry_delay);

        Self {
            config,
            inner: Mutex::new(Inner {
                endpoint: None,
                session: None,
                policy,
                in_flight: false,
            }),
            state: RwLock::new(ClientState::Disconnected),
            peer: RwLock::new(None),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect to a device, retrying per the reconnection policy.
    ///
    /// Any existing session is closed first, and a policy that had given up
    /// is reset.
    pub async fn connect(&self, host: &str, port: u16) -> bool {
        let Some(endpoint) = Endpoint::new(host, port) else {
            self.log(format!("✗ Invalid target '{}:{}'", host, port));
            return false;
        };

        let mut inner = self.inner.lock().await;

        inner.in_flight = false;
        if let Some(mut session) = inner.session.take() {
            session.close().await;
        }

        inner.endpoint = Some(endpoint);
        inner.policy.reset();
        self.reconnect(&mut inner).await
    }

    /// Send one key event to the device
    pub async fn send_key_event(&self, key: KeyCode) -> bool {
        self.log(format!("Sending key {}...", key));

        let sent = self.execute(&keyevent_command(key.code())).await;
        if sent {
            self.log(format!("✓ Sent key {}", key));
        }
        sent
    }

    /// Run an arbitrary shell command on the device
    pub async fn run_shell_command(&self, command: &str) -> bool {
        let ran = self.execute(command).await;
        if ran {
            self.log(format!("✓ Ran '{}'", command));
        }
        ran
    }

    /// Close the session. Safe to call when not connected.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;

        inner.in_flight = false;
        if let Some(mut session) = inner.session.take() {
            let endpoint = session.endpoint().clone();
            session.close().await;
            self.log(format!("Disconnected from {}", endpoint));
        }

        *self.peer.write().await = None;
        self.set_state(ClientState::Disconnected).await;
    }

    /// Get the current state
    pub async fn state(&self) -> ClientState {
        *self.state.read().await
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ClientState::Connected
    }

    /// Identity the device reported in its handshake
    pub async fn peer_info(&self) -> Option<PeerInfo> {
        self.peer.read().await.clone()
    }

    async fn execute(&self, command: &str) -> bool {
        let mut lock = self.inner.lock().await;
        let inner = &mut *lock;

        if self.close_abandoned(inner).await && !inner.policy.is_exhausted() {
            self.reconnect(inner).await;
        }

        let outcome = match inner.session.as_mut() {
            Some(session) if session.is_connected() => {
                let mut guard = CancelGuard {
                    client: self,
                    armed: true,
                };
                inner.in_flight = true;
                let result = self.run_with_deadline(session, command).await;
                inner.in_flight = false;
                guard.armed = false;
                Some(result)
            }
            _ => None,
        };

        match outcome {
            None => {
                inner.session = None;
                if inner.policy.is_exhausted() {
                    self.log(
                        "✗ Device unavailable after repeated connection failures - reconnect explicitly"
                            .to_string(),
                    );
                    self.set_state(ClientState::Unavailable).await;
                } else {
                    self.log("✗ Not connected - attempting reconnection...".to_string());
                    self.reconnect(inner).await;
                }
                false
            }
            Some(Ok(())) => true,
            Some(Err(ExecError::Rejected { command: reply })) => {
                self.log(format!("✗ Device rejected '{}' (answered {})", command, reply));
                false
            }
            Some(Err(e)) => {
                self.log(format!("✗ Failed to run '{}': {} - connection lost", command, e));
                if let Some(mut session) = inner.session.take() {
                    session.close().await;
                }
                *self.peer.write().await = None;
                self.set_state(ClientState::Disconnected).await;
                self.reconnect(inner).await;
                false
            }
        }
    }

    /// Close a session left mid-command by a dropped operation, so its
    /// stream is torn down and stale replies are never read as the next
    /// command's answer. Returns whether there was one.
    async fn close_abandoned(&self, inner: &mut Inner) -> bool {
        if !inner.in_flight {
            return false;
        }
        inner.in_flight = false;

        if let Some(mut session) = inner.session.take() {
            self.log(format!(
                "✗ Previous command on {} was cancelled - closing session",
                session.endpoint()
            ));
            session.close().await;
        }
        *self.peer.write().await = None;
        self.set_state(ClientState::Disconnected).await;
        true
    }

    /// A deadline that fires mid-write leaves the session unframed; its
    /// `close` then drops the socket without writing a CLOSE.
    async fn run_with_deadline(&self, session: &mut Session, command: &str) -> ExecResult<()> {
        let Some(limit) = self.config.operation_timeout else {
            return run_shell_command(session, command).await;
        };

        match tokio::time::timeout(limit, run_shell_command(session, command)).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::Transport(TransportError::Timeout(limit))),
        }
    }

    async fn reconnect(&self, inner: &mut Inner) -> bool {
        let Some(endpoint) = inner.endpoint.clone() else {
            self.log("✗ No device configured - call connect first".to_string());
            return false;
        };

        self.set_state(ClientState::Connecting).await;
        self.log(format!("Connecting to {}...", endpoint));

        let network = &self.config.network;
        let target = &endpoint;
        let result = inner
            .policy
            .run(
                move || Session::open(target, network),
                |event: &RetryEvent| self.emit(ClientEvent::Log(event.to_string())),
            )
            .await;

        match result {
            Ok(session) => {
                *self.peer.write().await = session.peer_info().cloned();
                inner.session = Some(session);
                self.set_state(ClientState::Connected).await;
                self.log(format!("✓ Connected to {}", endpoint));
                true
            }
            Err(ReconnectError::Exhausted { .. }) => {
                self.set_state(ClientState::Unavailable).await;
                false
            }
            Err(ReconnectError::Unavailable) => {
                self.log(format!(
                    "✗ {} unavailable after repeated connection failures",
                    endpoint
                ));
                self.set_state(ClientState::Unavailable).await;
                false
            }
        }
    }

    async fn set_state(&self, new_state: ClientState) {
        let mut state = self.state.write().await;
        if *state != new_state {
            tracing::debug!("Client state {:?} -> {:?}", *state, new_state);
            *state = new_state;
            self.emit(ClientEvent::StateChanged(new_state));
        }
    }

    fn log(&self, message: String) {
        tracing::info!("{}", message);
        self.emit(ClientEvent::Log(message));
    }

    /// Never blocks: a consumer that falls behind loses events instead of
    /// stalling the protocol.
    fn emit(&self, event: ClientEvent) {
        let _ = self.event_tx.try_send(event);
    }
}
