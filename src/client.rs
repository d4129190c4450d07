//! Client builder and handle.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the client.
//! [`Client`] is a cheap, cloneable handle onto a session supervisor task
//! that:
//! 1. Connects to the broker, retrying with backoff
//! 2. Replays the used tube and watch list on every new connection
//! 3. Parks commands issued while offline until the session is back
//!
//! # Example
//!
//! ```ignore
//! use beanstalk_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> beanstalk_client::Result<()> {
//!     let client = Client::builder()
//!         .consume_disconnects(false)
//!         .max_delay(std::time::Duration::from_secs(30))
//!         .build();
//!
//!     client.connect("127.0.0.1", 11300).await?;
//!     client.use_tube("emails").await?;
//!     let id = client.put("hello").await?;
//!     println!("inserted {}", id);
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::codec::{Arg, CommandCatalog, Response};
use crate::config::{BackoffConfig, ClientConfig};
use crate::connection::ConnectionHandle;
use crate::error::{BeanstalkError, Result};
use crate::session::supervisor::{self, Acquired, Control};
use crate::session::{SessionEvent, SessionPhase, SessionState, SessionStatus, SharedSession};

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    catalog: CommandCatalog,
}

impl ClientBuilder {
    /// Create a builder with default settings and the standard catalog.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            catalog: CommandCatalog::standard(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom command catalog.
    ///
    /// Restoring a session needs `use`, `watch` and `ignore` to be present.
    pub fn catalog(mut self, catalog: CommandCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Swallow disconnects instead of publishing them.
    ///
    /// When `false`, [`SessionEvent::Disconnected`] is published and a failed
    /// first attempt makes [`Client::connect`] return the error.
    /// Default: true
    pub fn consume_disconnects(mut self, consume: bool) -> Self {
        self.config.consume_disconnects = consume;
        self
    }

    /// Timeout for a single connect attempt.
    ///
    /// Default: 10 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Longest status line accepted from the broker.
    ///
    /// Default: 16 KiB
    pub fn max_line_length(mut self, limit: usize) -> Self {
        self.config.max_line_length = limit;
        self
    }

    /// Largest job or YAML body accepted from the broker.
    ///
    /// Default: 1 GiB
    pub fn max_body_size(mut self, limit: usize) -> Self {
        self.config.max_body_size = limit;
        self
    }

    /// Replace the backoff settings.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Delay before the first retry, and after every successful connect.
    ///
    /// Default: 1 second
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.backoff.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Ceiling for the retry delay.
    ///
    /// Default: 1 hour
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.backoff.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Growth factor applied after each failed attempt.
    pub fn factor(mut self, factor: f64) -> Self {
        self.config.backoff.factor = factor;
        self
    }

    /// Relative random spread applied to each delay. `0.0` disables it.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.config.backoff.jitter = jitter;
        self
    }

    /// Build the client and start its supervisor.
    ///
    /// Must be called from within a tokio runtime. The client starts out
    /// stopped; call [`Client::connect`].
    pub fn build(self) -> Client {
        let session = SharedSession::new();
        let catalog = Arc::new(self.catalog);
        let channels = supervisor::spawn(self.config, catalog.clone(), session.clone());

        Client {
            control: channels.control,
            events: channels.events,
            status: channels.status,
            catalog,
            session,
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a reconnecting broker session.
///
/// Clones share the same session. The supervisor stops, and the connection
/// is closed, once every clone has been dropped.
#[derive(Clone)]
pub struct Client {
    control: mpsc::UnboundedSender<Control>,
    events: broadcast::Sender<SessionEvent>,
    status: watch::Receiver<SessionStatus>,
    catalog: Arc<CommandCatalog>,
    session: SharedSession,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Build a client with default settings.
    pub fn new() -> Self {
        ClientBuilder::new().build()
    }

    /// Connect to `host:port` and keep reconnecting until [`disconnect`].
    ///
    /// Resolves once the first connection is up. With disconnects consumed
    /// (the default) it keeps waiting through failed attempts; otherwise the
    /// first failure is returned while retries continue in the background.
    ///
    /// # Errors
    ///
    /// [`BeanstalkError::Precondition`] if already connected or connecting.
    ///
    /// [`disconnect`]: Client::disconnect
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.control(Control::Connect {
            host: host.to_string(),
            port,
            reply,
        })?;
        rx.await.map_err(|_| BeanstalkError::NotConnected)?
    }

    /// Stop reconnecting and close the connection.
    ///
    /// Commands parked while offline fail with
    /// [`BeanstalkError::NotConnected`]; commands already on the wire fail
    /// with [`BeanstalkError::Disconnected`]. Resolves once the connection
    /// is closed.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.control(Control::Disconnect { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Skip the rest of the current backoff delay and attempt right away.
    ///
    /// No-op unless the client is waiting to reconnect.
    pub fn retry(&self) {
        let _ = self.control.send(Control::Retry);
    }

    /// Run a catalog command by name.
    ///
    /// Arguments are encoded first, so invalid input fails without touching
    /// the connection. While reconnecting the command waits for the session
    /// to come back; once written it is never resent.
    ///
    /// # Errors
    ///
    /// - [`BeanstalkError::InvalidArgument`] if the command cannot be encoded
    /// - [`BeanstalkError::NotConnected`] if the client is stopped
    /// - [`BeanstalkError::Disconnected`] if the connection drops before
    ///   the reply
    /// - [`BeanstalkError::Command`] for broker failure statuses
    pub async fn call(&self, name: &str, args: &[Arg]) -> Result<Response> {
        let encoded = self.catalog.encode(name, args)?;
        let conn = self.acquire().await?;
        conn.send(encoded).await
    }

    async fn acquire(&self) -> Result<ConnectionHandle> {
        let (reply, rx) = oneshot::channel();
        self.control(Control::Acquire { reply })?;

        match rx.await.map_err(|_| BeanstalkError::NotConnected)? {
            Acquired::Ready(conn) => Ok(conn),
            Acquired::Parked(waiter) => waiter.await.map_err(|_| BeanstalkError::NotConnected)?,
            Acquired::Stopped => Err(BeanstalkError::NotConnected),
        }
    }

    fn control(&self, msg: Control) -> Result<()> {
        self.control
            .send(msg)
            .map_err(|_| BeanstalkError::NotConnected)
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Whether a restored connection is ready for commands.
    pub fn is_connected(&self) -> bool {
        self.status.borrow().phase == SessionPhase::Connected
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.status.borrow().phase
    }

    /// Current backoff delay (before jitter).
    pub fn current_delay(&self) -> Duration {
        self.status.borrow().delay
    }

    /// Snapshot of the tube state that is replayed on reconnect.
    pub fn session_state(&self) -> SessionState {
        self.session.snapshot()
    }

    /// The command catalog in use.
    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }

    /// Wait until the phase satisfies `f`.
    ///
    /// # Errors
    ///
    /// [`BeanstalkError::NotConnected`] if the supervisor has stopped.
    pub async fn wait_for_phase<F>(&self, f: F) -> Result<SessionPhase>
    where
        F: Fn(SessionPhase) -> bool,
    {
        let mut status = self.status.clone();
        let current = status
            .wait_for(|s| f(s.phase))
            .await
            .map_err(|_| BeanstalkError::NotConnected)?;
        Ok(current.phase)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("phase", &self.phase())
            .field("session", &self.session_state())
            .finish()
    }
}
