//! Protocol module - framing and in-order reply dispatch.
//!
//! This module implements the receive side of one broker connection:
//! - Line framing for status replies (`\r\n` terminated)
//! - Length-driven raw mode for job and YAML bodies
//! - FIFO matching of replies to in-flight commands

mod engine;

pub use engine::{
    Engine, PendingCommand, ReceiveMode, DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_LINE_LENGTH,
};
