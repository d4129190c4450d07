//! Reply framing and dispatch for a single connection.
//!
//! Implements a state machine over the incoming byte stream:
//! - `Framed`: replies arrive as `\r\n` terminated status lines
//! - `RawBody`: the head command announced a body, collect exactly
//!   `remaining` bytes before handing it over
//!
//! Bytes left over after a body are processed as framed input straight
//! away, since the stream may already carry the next reply.
//!
//! # Example
//!
//! ```
//! use beanstalk_client::codec::{CommandCatalog, Response};
//! use beanstalk_client::protocol::{Engine, PendingCommand};
//! use beanstalk_client::session::SharedSession;
//!
//! let catalog = CommandCatalog::standard();
//! let mut engine = Engine::new(SharedSession::new());
//!
//! let encoded = catalog.encode("reserve", &[]).unwrap();
//! let (pending, mut rx) = PendingCommand::new(encoded);
//! engine.push(pending);
//!
//! // Body split across reads.
//! engine.receive(b"RESERVED 7 5\r\nhel").unwrap();
//! assert!(rx.try_recv().is_err());
//! engine.receive(b"lo\r\n").unwrap();
//!
//! match rx.try_recv().unwrap().unwrap() {
//!     Response::Job(job) => assert_eq!(&job.body[..], b"hello"),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use std::collections::VecDeque;

use bytes::BytesMut;
use tokio::sync::oneshot;

use crate::codec::{Encoded, HandlerOutcome, Response, ResponseHandler, TubeChange};
use crate::error::{BeanstalkError, Result};
use crate::session::SharedSession;

/// Longest status line accepted before the connection is considered broken.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024;

/// Largest reply body accepted (1 GiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1_073_741_824;

/// Current receive mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Waiting for a `\r\n` terminated line.
    Framed,
    /// Head command needs exactly `remaining` raw bytes.
    RawBody { remaining: usize },
}

/// A command that has been written and is waiting for its reply.
pub struct PendingCommand {
    /// Catalog name, for logging.
    pub name: &'static str,
    handler: Box<dyn ResponseHandler>,
    change: Option<TubeChange>,
    reply: oneshot::Sender<Result<Response>>,
}

impl PendingCommand {
    /// Wrap an encoded command, returning the receiver its reply is sent to.
    pub fn new(encoded: Encoded) -> (Self, oneshot::Receiver<Result<Response>>) {
        let (tx, rx) = oneshot::channel();
        let pending = Self {
            name: encoded.name,
            handler: encoded.handler,
            change: encoded.change,
            reply: tx,
        };
        (pending, rx)
    }

    /// Build from parts (restoration commands and tests).
    pub fn from_parts(
        name: &'static str,
        handler: Box<dyn ResponseHandler>,
        change: Option<TubeChange>,
    ) -> (Self, oneshot::Receiver<Result<Response>>) {
        let (tx, rx) = oneshot::channel();
        let pending = Self {
            name,
            handler,
            change,
            reply: tx,
        };
        (pending, rx)
    }

    /// Complete the command with an error without it ever reaching the wire.
    pub fn fail(self, err: BeanstalkError) {
        let _ = self.reply.send(Err(err));
    }
}

impl std::fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCommand")
            .field("name", &self.name)
            .field("change", &self.change)
            .finish()
    }
}

/// Framing and dispatch state for one connection.
///
/// Owned by the connection task; nothing here is shared except the session
/// state, which is updated when a tube-changing command is confirmed.
pub struct Engine {
    /// Commands awaiting replies, oldest first.
    in_flight: VecDeque<PendingCommand>,
    /// Current parsing mode.
    mode: ReceiveMode,
    /// Bytes received but not yet consumed.
    buffer: BytesMut,
    /// Replay state updated on confirmed `use`/`watch`/`ignore`.
    session: SharedSession,
    /// Maximum status line length.
    max_line_length: usize,
    /// Maximum announced body size, terminator included.
    max_body_size: usize,
}

impl Engine {
    /// Create an engine recording tube changes into `session`.
    pub fn new(session: SharedSession) -> Self {
        Self::with_max_line_length(session, DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create an engine with a custom status line limit.
    pub fn with_max_line_length(session: SharedSession, max_line_length: usize) -> Self {
        Self::with_limits(session, max_line_length, DEFAULT_MAX_BODY_SIZE)
    }

    /// Create an engine with custom status line and body limits.
    pub fn with_limits(session: SharedSession, max_line_length: usize, max_body_size: usize) -> Self {
        Self {
            in_flight: VecDeque::new(),
            mode: ReceiveMode::Framed,
            buffer: BytesMut::with_capacity(4 * 1024),
            session,
            max_line_length,
            max_body_size,
        }
    }

    /// Append a command to the tail of the in-flight queue.
    ///
    /// Must be called before the command's bytes are written so that a fast
    /// reply always finds its command.
    pub fn push(&mut self, pending: PendingCommand) {
        tracing::trace!(command = pending.name, depth = self.in_flight.len() + 1, "queued");
        self.in_flight.push_back(pending);
    }

    /// Feed bytes read from the socket.
    ///
    /// # Errors
    ///
    /// Returns an error only for stream-level corruption: an over-long status
    /// line or a body larger than the limit. Per-command decode failures are
    /// delivered to that command.
    pub fn receive(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);

        loop {
            match self.mode {
                ReceiveMode::Framed => {
                    let Some(pos) = find_crlf(&self.buffer) else {
                        if self.buffer.len() > self.max_line_length {
                            return Err(BeanstalkError::Decode(format!(
                                "status line exceeds {} bytes",
                                self.max_line_length
                            )));
                        }
                        return Ok(());
                    };
                    let line = self.buffer.split_to(pos + 2);
                    self.on_framed_chunk(&line)?;
                }
                ReceiveMode::RawBody { remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(());
                    }
                    let body = self.buffer.split_to(remaining);
                    self.on_raw_body(&body)?;
                }
            }
        }
    }

    /// Dispatch one complete status line to the oldest command.
    fn on_framed_chunk(&mut self, line: &[u8]) -> Result<()> {
        let Some(mut pending) = self.in_flight.pop_front() else {
            let text = String::from_utf8_lossy(line);
            tracing::warn!(line = %text.trim_end(), "reply with no command in flight, dropping");
            return Ok(());
        };

        let outcome = pending.handler.handle(line);
        self.settle(pending, outcome)
    }

    /// Hand a complete body to the oldest command.
    fn on_raw_body(&mut self, body: &[u8]) -> Result<()> {
        self.mode = ReceiveMode::Framed;

        let Some(mut pending) = self.in_flight.pop_front() else {
            tracing::warn!(len = body.len(), "body with no command in flight, dropping");
            return Ok(());
        };

        let outcome = pending.handler.handle(body);
        self.settle(pending, outcome)
    }

    fn settle(&mut self, pending: PendingCommand, outcome: HandlerOutcome) -> Result<()> {
        match outcome {
            HandlerOutcome::Complete(response) => self.resolve(pending, response),
            HandlerOutcome::Failed(err) => {
                tracing::debug!(command = pending.name, error = %err, "command failed");
                let _ = pending.reply.send(Err(err));
            }
            HandlerOutcome::NeedMore(remaining) if remaining > self.max_body_size => {
                // The body cannot be skipped safely, so framing is lost.
                let msg = format!(
                    "body size {} exceeds maximum {}",
                    remaining, self.max_body_size
                );
                tracing::error!(command = pending.name, "{}", msg);
                pending.fail(BeanstalkError::Decode(msg.clone()));
                return Err(BeanstalkError::Decode(msg));
            }
            HandlerOutcome::NeedMore(remaining) => {
                // Still the oldest command; it stays at the head.
                self.in_flight.push_front(pending);
                self.mode = ReceiveMode::RawBody { remaining };
            }
        }
        Ok(())
    }

    fn resolve(&mut self, pending: PendingCommand, response: Response) {
        if let Some(change) = &pending.change {
            self.session.apply(change);
        }
        tracing::debug!(command = pending.name, "command completed");
        let _ = pending.reply.send(Ok(response));
    }

    /// Fail every in-flight command, oldest first, and reset framing.
    pub fn fail_all(&mut self, reason: &str) {
        if !self.in_flight.is_empty() {
            tracing::debug!(count = self.in_flight.len(), reason, "failing in-flight commands");
        }
        for pending in self.in_flight.drain(..) {
            let _ = pending
                .reply
                .send(Err(BeanstalkError::Disconnected(reason.to_string())));
        }
        self.buffer.clear();
        self.mode = ReceiveMode::Framed;
    }

    /// Number of commands waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Current receive mode.
    pub fn mode(&self) -> ReceiveMode {
        self.mode
    }

    /// Number of buffered, unconsumed bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
