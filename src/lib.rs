//! # beanstalk-client
//!
//! Async client for the beanstalkd work queue.
//!
//! The client keeps a session alive across connection drops: it reconnects
//! with exponential backoff, replays the used tube and watch list on the new
//! connection, and parks commands issued while offline until the session is
//! back.
//!
//! ## Architecture
//!
//! - **Codec** ([`codec`]): command catalog and incremental reply decoders
//! - **Protocol engine** ([`protocol`]): FIFO matching of replies to
//!   pipelined commands, line and body framing
//! - **Connection** ([`connection`]): one I/O task per socket
//! - **Session** ([`session`]): supervisor task owning connect, backoff,
//!   restore and the [`gate::WaitingGate`] for offline commands
//!
//! ## Example
//!
//! ```ignore
//! use beanstalk_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> beanstalk_client::Result<()> {
//!     let client = Client::new();
//!     client.connect("127.0.0.1", 11300).await?;
//!
//!     client.watch("emails").await?;
//!     client.ignore("default").await?;
//!
//!     let job = client.reserve().await?;
//!     client.delete(job.id).await?;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod gate;
pub mod protocol;
pub mod session;
pub mod transport;

mod client;
mod commands;

pub use client::{Client, ClientBuilder};
pub use codec::{Arg, Job, Response};
pub use commands::{JobOptions, DEFAULT_PRIORITY, DEFAULT_TTR};
pub use config::{BackoffConfig, ClientConfig};
pub use error::{BeanstalkError, CommandError, Result};
pub use session::{SessionEvent, SessionPhase};
