//! Connection task: one per live socket.
//!
//! Owns the [`Engine`] and both halves of the stream. Requests arrive over
//! an mpsc channel from any number of [`ConnectionHandle`] clones:
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► mpsc::Sender<Outbound> ─► Connection Task ─► Socket
//! Caller N ─┘                                  ▲
//!                                              └── replies via Engine
//! ```
//!
//! Each request is pushed onto the engine's in-flight queue and then written
//! straight away, so send order equals wire order equals reply order.
//!
//! When the stream ends, every in-flight command is failed oldest first and
//! only then is the `on_close` callback invoked with the reason. The callback
//! also fires if the task panics or is aborted.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::{Encoded, Response};
use crate::error::{BeanstalkError, Result};
use crate::protocol::{Engine, PendingCommand};

/// Default request channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Read buffer size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Reason reported when the peer closes the stream.
pub const CLOSED_BY_PEER: &str = "connection closed by server";

/// Reason reported when the client closes the stream.
pub const CLOSED_BY_CLIENT: &str = "connection closed by client";

/// Reason reported when the task ends without reaching its shutdown path.
pub const TASK_FAILED: &str = "connection task failed";

enum Outbound {
    Command { bytes: Bytes, pending: PendingCommand },
    Close,
}

/// Cheaply cloneable handle to a running connection task.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: u64,
    tx: mpsc::Sender<Outbound>,
    /// Set once, when the task stops reading.
    closed: Arc<OnceLock<String>>,
}

impl ConnectionHandle {
    /// Identifier assigned at spawn time.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Write a command and wait for its reply.
    ///
    /// # Errors
    ///
    /// [`BeanstalkError::Disconnected`] carrying the close reason if the
    /// connection ends before the reply arrives; otherwise whatever the reply
    /// decodes to.
    pub async fn send(&self, encoded: Encoded) -> Result<Response> {
        let bytes = encoded.bytes.clone();
        let (pending, rx) = PendingCommand::new(encoded);

        self.tx
            .send(Outbound::Command { bytes, pending })
            .await
            .map_err(|_| self.disconnected())?;

        rx.await.map_err(|_| self.disconnected())?
    }

    /// Why the connection ended, once it has.
    pub fn close_reason(&self) -> Option<String> {
        self.closed.get().cloned()
    }

    fn disconnected(&self) -> BeanstalkError {
        let reason = self.close_reason().unwrap_or_else(|| TASK_FAILED.to_string());
        BeanstalkError::Disconnected(reason)
    }

    /// Ask the task to shut the stream down.
    ///
    /// Commands already queued ahead of the close are still written.
    pub fn close(&self) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(Outbound::Close).await;
        });
    }

    /// Whether the task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Spawn the connection task for `stream`.
///
/// `on_close` runs exactly once, after all in-flight commands have been
/// failed, with a human-readable reason. If the task dies early it reports
/// [`TASK_FAILED`].
pub fn spawn<S, F>(
    stream: S,
    id: u64,
    engine: Engine,
    on_close: F,
) -> (ConnectionHandle, JoinHandle<()>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    F: FnOnce(String) + Send + 'static,
{
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
    let closed = Arc::new(OnceLock::new());

    let notifier = CloseNotifier {
        id,
        closed: closed.clone(),
        on_close: Some(on_close),
    };
    let task_closed = closed.clone();
    let task = tokio::spawn(async move {
        let _notifier = notifier;
        run(stream, rx, engine, task_closed).await;
    });

    (ConnectionHandle { id, tx, closed }, task)
}

/// Invokes `on_close` when dropped, whether the task returned, panicked or
/// was aborted.
struct CloseNotifier<F: FnOnce(String)> {
    id: u64,
    closed: Arc<OnceLock<String>>,
    on_close: Option<F>,
}

impl<F: FnOnce(String)> Drop for CloseNotifier<F> {
    fn drop(&mut self) {
        let reason = self.closed.get_or_init(|| TASK_FAILED.to_string()).clone();
        if reason == TASK_FAILED {
            tracing::error!(connection = self.id, "connection task ended abnormally");
        } else {
            tracing::debug!(connection = self.id, reason = %reason, "connection task finished");
        }
        if let Some(on_close) = self.on_close.take() {
            on_close(reason);
        }
    }
}

async fn run<S>(
    stream: S,
    mut rx: mpsc::Receiver<Outbound>,
    mut engine: Engine,
    closed: Arc<OnceLock<String>>,
) where
    S: AsyncRead + AsyncWrite + Send,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let reason = loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break CLOSED_BY_PEER.to_string(),
                Ok(n) => {
                    if let Err(e) = engine.receive(&buf[..n]) {
                        tracing::error!("Protocol error: {}", e);
                        break e.to_string();
                    }
                }
                Err(e) => break e.to_string(),
            },
            msg = rx.recv() => match msg {
                Some(Outbound::Command { bytes, pending }) => {
                    engine.push(pending);
                    if let Err(e) = writer.write_all(&bytes).await {
                        break e.to_string();
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = writer.shutdown().await;
                    break CLOSED_BY_CLIENT.to_string();
                }
            },
        }
    };

    let _ = closed.set(reason.clone());
    engine.fail_all(&reason);

    // Requests that were queued but never written go after the in-flight ones.
    rx.close();
    while let Ok(msg) = rx.try_recv() {
        if let Outbound::Command { pending, .. } = msg {
            pending.fail(BeanstalkError::Disconnected(reason.clone()));
        }
    }
}
