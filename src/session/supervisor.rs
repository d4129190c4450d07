//! Supervisor task: owns the connection lifecycle for one client.
//!
//! Every [`Client`](crate::Client) clone talks to the same supervisor over
//! an unbounded control channel. Connect attempts, backoff timers, restores
//! and the connection task itself run as separate tasks and report back over
//! an internal channel, tagged with a token so stale reports are ignored.
//!
//! ```text
//! Client ──Control──► Supervisor ◄──Internal── connect attempt / timer /
//!                        │                     restore / connection task
//!                        ├──► watch<SessionStatus>
//!                        └──► broadcast<SessionEvent>
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::backoff::ReconnectPolicy;
use crate::codec::CommandCatalog;
use crate::config::ClientConfig;
use crate::connection::{self, ConnectionHandle};
use crate::error::{BeanstalkError, Result};
use crate::gate::{Waiter, WaitingGate};
use crate::protocol::Engine;
use crate::session::{restore, SharedSession};
use crate::transport;

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Not connected and not trying to be.
    Stopped,
    /// A TCP connect attempt is running.
    Connecting,
    /// Connected; replaying tube state before commands are let through.
    Restoring,
    /// Ready for commands.
    Connected,
    /// Waiting out the backoff delay before the next attempt.
    Waiting,
    /// Closing the connection after an explicit disconnect.
    Disconnecting,
}

/// Snapshot published on every phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    /// Backoff delay the next retry will use (before jitter).
    pub delay: Duration,
    /// Failed attempts since the last successful connect.
    pub retries: u32,
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A connection is up and its tube state restored.
    Connected,
    /// A connect attempt failed or the connection was lost.
    ///
    /// Only published when disconnects are not consumed.
    Disconnected { reason: String },
}

/// Requests from client handles.
pub(crate) enum Control {
    Connect {
        host: String,
        port: u16,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Retry,
    Acquire {
        reply: oneshot::Sender<Acquired>,
    },
}

/// Answer to [`Control::Acquire`].
pub(crate) enum Acquired {
    Ready(ConnectionHandle),
    Parked(Waiter<ConnectionHandle>),
    Stopped,
}

/// Reports from tasks the supervisor spawned.
enum Internal {
    Attempted { token: u64, result: Result<TcpStream> },
    RetryDue { token: u64 },
    Restored { conn: u64, result: Result<()> },
    Lost { conn: u64, reason: String },
}

/// Channels a client handle needs to reach a running supervisor.
pub(crate) struct SupervisorChannels {
    pub control: mpsc::UnboundedSender<Control>,
    pub events: broadcast::Sender<SessionEvent>,
    pub status: watch::Receiver<SessionStatus>,
}

/// Spawn the supervisor. It runs until every control sender is dropped.
pub(crate) fn spawn(
    config: ClientConfig,
    catalog: Arc<CommandCatalog>,
    session: SharedSession,
) -> SupervisorChannels {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let policy = ReconnectPolicy::new(config.backoff.clone());
    let (status_tx, status_rx) = watch::channel(SessionStatus {
        phase: SessionPhase::Stopped,
        delay: policy.current_delay(),
        retries: 0,
    });

    let supervisor = Supervisor {
        config,
        catalog,
        session,
        policy,
        gate: WaitingGate::new(),
        phase: SessionPhase::Stopped,
        addr: None,
        connection: None,
        next_token: 0,
        attempt: 0,
        timer_token: 0,
        connecting: None,
        timer: None,
        connect_waiters: Vec::new(),
        disconnect_waiters: Vec::new(),
        internal_tx,
        events: events.clone(),
        status: status_tx,
    };
    tokio::spawn(supervisor.run(control_rx, internal_rx));

    SupervisorChannels {
        control: control_tx,
        events,
        status: status_rx,
    }
}

struct Supervisor {
    config: ClientConfig,
    catalog: Arc<CommandCatalog>,
    session: SharedSession,
    policy: ReconnectPolicy,
    /// Parks commands issued while not connected.
    gate: WaitingGate<ConnectionHandle>,
    phase: SessionPhase,
    addr: Option<(String, u16)>,
    /// Current connection, from TCP connect until its task reports it lost.
    connection: Option<ConnectionHandle>,
    next_token: u64,
    /// Token of the connect attempt in progress.
    attempt: u64,
    /// Token of the armed backoff timer.
    timer_token: u64,
    connecting: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
    /// `connect` calls waiting for the first restored connection.
    connect_waiters: Vec<oneshot::Sender<Result<()>>>,
    /// `disconnect` calls waiting for the connection task to finish.
    disconnect_waiters: Vec<oneshot::Sender<()>>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    events: broadcast::Sender<SessionEvent>,
    status: watch::Sender<SessionStatus>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<Control>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                msg = control.recv() => match msg {
                    Some(msg) => self.on_control(msg),
                    None => break,
                },
                Some(msg) = internal.recv() => self.on_internal(msg),
            }
        }

        tracing::debug!("all client handles dropped, stopping session");
        self.stop();
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
    }

    fn on_control(&mut self, msg: Control) {
        match msg {
            Control::Connect { host, port, reply } => self.on_connect(host, port, reply),
            Control::Disconnect { reply } => self.on_disconnect(reply),
            Control::Retry => self.on_retry(),
            Control::Acquire { reply } => {
                let _ = reply.send(self.acquire());
            }
        }
    }

    fn on_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Attempted { token, result } => self.on_attempted(token, result),
            Internal::RetryDue { token } => {
                if self.phase == SessionPhase::Waiting && token == self.timer_token {
                    self.timer = None;
                    self.attempt_connect();
                }
            }
            Internal::Restored { conn, result } => self.on_restored(conn, result),
            Internal::Lost { conn, reason } => self.on_lost(conn, reason),
        }
    }

    // ========================================================================
    // Control
    // ========================================================================

    fn on_connect(&mut self, host: String, port: u16, reply: oneshot::Sender<Result<()>>) {
        let busy = match self.phase {
            SessionPhase::Stopped => None,
            SessionPhase::Connected => Some("already connected"),
            SessionPhase::Disconnecting => Some("disconnect in progress"),
            _ => Some("already connecting"),
        };
        if let Some(msg) = busy {
            let _ = reply.send(Err(BeanstalkError::Precondition(msg.into())));
            return;
        }

        tracing::info!(host = %host, port, "connecting to broker");
        self.session.reset();
        self.gate = WaitingGate::new();
        self.policy.reset();
        self.policy.start();
        self.addr = Some((host, port));
        self.connect_waiters.push(reply);
        self.attempt_connect();
    }

    fn on_disconnect(&mut self, reply: oneshot::Sender<()>) {
        self.stop();
        self.session.reset();

        match &self.connection {
            Some(conn) => {
                conn.close();
                self.set_phase(SessionPhase::Disconnecting);
                self.disconnect_waiters.push(reply);
            }
            None => {
                self.set_phase(SessionPhase::Stopped);
                let _ = reply.send(());
            }
        }
    }

    fn on_retry(&mut self) {
        if self.phase != SessionPhase::Waiting {
            tracing::debug!(phase = ?self.phase, "retry ignored, not waiting on a timer");
            return;
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.attempt_connect();
    }

    fn acquire(&mut self) -> Acquired {
        match (self.phase, &self.connection) {
            (SessionPhase::Connected, Some(conn)) => Acquired::Ready(conn.clone()),
            (SessionPhase::Connecting | SessionPhase::Restoring | SessionPhase::Waiting, _) => {
                match self.gate.push() {
                    Ok(waiter) => Acquired::Parked(waiter),
                    Err(_) => Acquired::Stopped,
                }
            }
            _ => Acquired::Stopped,
        }
    }

    /// Turn reconnecting off and release everyone waiting on it.
    fn stop(&mut self) {
        self.policy.stop();
        self.attempt = self.token();
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }

        let mut gate = std::mem::take(&mut self.gate);
        if !gate.is_fired() {
            let _ = gate.fire(Err(BeanstalkError::NotConnected));
        }
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(BeanstalkError::NotConnected));
        }
    }

    // ========================================================================
    // Connect / restore / lose
    // ========================================================================

    fn attempt_connect(&mut self) {
        let Some((host, port)) = self.addr.clone() else {
            self.set_phase(SessionPhase::Stopped);
            return;
        };

        let token = self.token();
        self.attempt = token;
        self.set_phase(SessionPhase::Connecting);

        let timeout = self.config.connect_timeout();
        let internal = self.internal_tx.clone();
        self.connecting = Some(tokio::spawn(async move {
            let result = transport::connect(&host, port, timeout).await;
            let _ = internal.send(Internal::Attempted { token, result });
        }));
    }

    fn on_attempted(&mut self, token: u64, result: Result<TcpStream>) {
        if token != self.attempt || self.phase != SessionPhase::Connecting {
            return;
        }
        self.connecting = None;

        match result {
            Ok(stream) => self.on_transport_up(token, stream),
            Err(e) => {
                tracing::warn!("Connect attempt failed: {}", e);
                self.report_failure(e);
                self.schedule_retry();
            }
        }
    }

    fn on_transport_up(&mut self, conn: u64, stream: TcpStream) {
        tracing::debug!(connection = conn, "transport connected");
        self.policy.reset();

        let engine = Engine::with_limits(
            self.session.clone(),
            self.config.max_line_length,
            self.config.max_body_size,
        );
        let internal = self.internal_tx.clone();
        let (handle, _task) = connection::spawn(stream, conn, engine, move |reason| {
            let _ = internal.send(Internal::Lost { conn, reason });
        });
        self.connection = Some(handle.clone());
        self.set_phase(SessionPhase::Restoring);

        let state = self.session.snapshot();
        let catalog = self.catalog.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = restore(&handle, &catalog, &state).await;
            let _ = internal.send(Internal::Restored { conn, result });
        });
    }

    fn on_restored(&mut self, conn: u64, result: Result<()>) {
        let Some(handle) = self.connection.clone().filter(|c| c.id() == conn) else {
            return;
        };
        if self.phase != SessionPhase::Restoring {
            return;
        }

        match result {
            Ok(()) => {
                tracing::info!(connection = conn, "session ready");
                self.set_phase(SessionPhase::Connected);

                let mut gate = std::mem::take(&mut self.gate);
                if let Err(e) = gate.fire(Ok(handle)) {
                    tracing::error!("Waiting gate error: {}", e);
                }
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                let _ = self.events.send(SessionEvent::Connected);
            }
            // The connection task reports the loss itself.
            Err(e) if e.is_transport() => {
                tracing::debug!(connection = conn, error = %e, "restore interrupted");
            }
            Err(e) => {
                tracing::error!("Restoring session state failed: {}", e);
                handle.close();
            }
        }
    }

    fn on_lost(&mut self, conn: u64, reason: String) {
        if self.connection.as_ref().map(ConnectionHandle::id) != Some(conn) {
            return;
        }
        self.connection = None;

        if self.phase == SessionPhase::Disconnecting {
            tracing::info!(connection = conn, "disconnected");
            self.set_phase(SessionPhase::Stopped);
            self.publish_disconnect(reason);
            for waiter in self.disconnect_waiters.drain(..) {
                let _ = waiter.send(());
            }
            return;
        }

        tracing::warn!("Connection lost: {}", reason);
        self.report_failure(BeanstalkError::Disconnected(reason));
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        if !self.policy.is_retrying() {
            self.set_phase(SessionPhase::Stopped);
            return;
        }

        let delay = self.policy.next_delay();
        let token = self.token();
        self.timer_token = token;
        self.set_phase(SessionPhase::Waiting);
        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            retries = self.policy.retries(),
            "reconnecting after delay"
        );

        let internal = self.internal_tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::RetryDue { token });
        }));
    }

    /// Surface a failed attempt or lost connection, unless consumed.
    fn report_failure(&mut self, err: BeanstalkError) {
        if self.config.consume_disconnects {
            return;
        }
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
        self.publish_disconnect(err.to_string());
    }

    fn publish_disconnect(&self, reason: String) {
        if !self.config.consume_disconnects {
            let _ = self.events.send(SessionEvent::Disconnected { reason });
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
        self.status.send_replace(SessionStatus {
            phase,
            delay: self.policy.current_delay(),
            retries: self.policy.retries(),
        });
    }
}
