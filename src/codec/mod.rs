//! Codec module - command encoding and reply decoding.
//!
//! The codec is the only part of the crate that knows the broker's text
//! grammar. Everything above it deals in command names, [`Arg`] lists and
//! decoded [`Response`] values:
//!
//! - [`CommandCatalog`] - dispatch table from command name to [`CommandSpec`]
//! - [`ResponseHandler`] - incremental decoder fed by the protocol engine
//! - [`ReplyHandler`] - the handler used for every catalog command
//!
//! # Design
//!
//! A handler is fed one chunk at a time. The first chunk is always a full
//! status line (terminator included). If the status announces a body, the
//! handler answers [`HandlerOutcome::NeedMore`] and the engine hands it the
//! body in one piece once exactly that many bytes have arrived.
//!
//! # Example
//!
//! ```
//! use beanstalk_client::codec::{Arg, CommandCatalog, HandlerOutcome, Response};
//!
//! let catalog = CommandCatalog::standard();
//! let mut encoded = catalog.encode("delete", &[Arg::from(42u64)]).unwrap();
//! assert_eq!(&encoded.bytes[..], b"delete 42\r\n");
//!
//! match encoded.handler.handle(b"DELETED\r\n") {
//!     HandlerOutcome::Complete(Response::Deleted) => {}
//!     _ => panic!("unexpected outcome"),
//! }
//! ```

mod catalog;
mod reply;

pub use catalog::{Arg, CommandCatalog, CommandSpec, Encoded, Param, TubeChange, MAX_TUBE_NAME};
pub use reply::{Job, JobStats, ReplyHandler, ReplyKind, Response, ServerStats, Stats, TubeStats};

use crate::error::BeanstalkError;

/// Outcome of feeding one chunk to a [`ResponseHandler`].
#[derive(Debug)]
pub enum HandlerOutcome {
    /// The reply is fully decoded.
    Complete(Response),
    /// The reply carries a body of this many raw bytes (terminator included).
    NeedMore(usize),
    /// The reply is a failure status or could not be decoded.
    Failed(BeanstalkError),
}

/// Incremental reply decoder for one in-flight command.
pub trait ResponseHandler: Send {
    /// Feed a status line or, after [`HandlerOutcome::NeedMore`], the body.
    fn handle(&mut self, chunk: &[u8]) -> HandlerOutcome;
}
