//! Command catalog - the dispatch table behind every client operation.
//!
//! Each [`CommandSpec`] names a command, its wire verb, the positional
//! parameters it takes and the reply it expects. The catalog is built once
//! and handed to the client explicitly; there is no global registry.

use std::collections::HashMap;
use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};

use super::reply::{ReplyHandler, ReplyKind};
use super::ResponseHandler;
use crate::error::{BeanstalkError, Result};

/// Maximum tube name length accepted by the broker.
pub const MAX_TUBE_NAME: usize = 200;

/// A positional command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Job id, priority, delay, ttr, count...
    Int(u64),
    /// Tube name.
    Text(String),
    /// Job body.
    Body(Bytes),
}

impl From<u64> for Arg {
    fn from(v: u64) -> Self {
        Arg::Int(v)
    }
}

impl From<u32> for Arg {
    fn from(v: u32) -> Self {
        Arg::Int(v as u64)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Text(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Text(v)
    }
}

impl From<Bytes> for Arg {
    fn from(v: Bytes) -> Self {
        Arg::Body(v)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(v: Vec<u8>) -> Self {
        Arg::Body(Bytes::from(v))
    }
}

impl From<&[u8]> for Arg {
    fn from(v: &[u8]) -> Self {
        Arg::Body(Bytes::copy_from_slice(v))
    }
}

/// Kind of a positional parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Int,
    Tube,
    Body,
}

/// Session side effect of a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TubeChange {
    Use(String),
    Watch(String),
    Ignore(String),
}

/// Which side effect a command has on the session, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    None,
    Use,
    Watch,
    Ignore,
}

/// Definition of one command.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Name used by callers (`list_tube_used`).
    pub name: &'static str,
    /// Verb sent on the wire (`list-tube-used`).
    pub verb: &'static str,
    /// Positional parameters, in call order.
    pub params: &'static [Param],
    /// Expected success reply.
    pub reply: ReplyKind,
    effect: Effect,
}

impl CommandSpec {
    const fn new(
        name: &'static str,
        verb: &'static str,
        params: &'static [Param],
        reply: ReplyKind,
    ) -> Self {
        Self {
            name,
            verb,
            params,
            reply,
            effect: Effect::None,
        }
    }

    const fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = effect;
        self
    }

    /// Encode a request line (and body, for `put`).
    ///
    /// Non-body arguments are written in call order; a body argument is
    /// written as a trailing byte count followed by the body on its own line.
    pub fn encode(&self, args: &[Arg]) -> Result<Bytes> {
        if args.len() != self.params.len() {
            return Err(BeanstalkError::InvalidArgument(format!(
                "{} takes {} argument(s), got {}",
                self.name,
                self.params.len(),
                args.len()
            )));
        }

        let mut line = String::from(self.verb);
        let mut body: Option<&Bytes> = None;

        for (param, arg) in self.params.iter().zip(args) {
            match (param, arg) {
                (Param::Int, Arg::Int(v)) => {
                    let _ = write!(line, " {}", v);
                }
                (Param::Tube, Arg::Text(name)) => {
                    validate_tube_name(name)?;
                    line.push(' ');
                    line.push_str(name);
                }
                (Param::Body, Arg::Body(data)) => body = Some(data),
                (param, arg) => {
                    return Err(BeanstalkError::InvalidArgument(format!(
                        "{}: expected {:?}, got {:?}",
                        self.name, param, arg
                    )));
                }
            }
        }

        let body_len = body.map(|b| b.len() + 2).unwrap_or(0);
        let mut buf = BytesMut::with_capacity(line.len() + 24 + body_len);
        buf.put_slice(line.as_bytes());
        if let Some(data) = body {
            let _ = write!(buf, " {}", data.len());
            buf.put_slice(b"\r\n");
            buf.put_slice(data);
        }
        buf.put_slice(b"\r\n");
        Ok(buf.freeze())
    }

    /// Side effect this command has on the session once confirmed.
    pub fn tube_change(&self, args: &[Arg]) -> Option<TubeChange> {
        let tube = match args.first() {
            Some(Arg::Text(t)) => t.clone(),
            _ => return None,
        };
        match self.effect {
            Effect::None => None,
            Effect::Use => Some(TubeChange::Use(tube)),
            Effect::Watch => Some(TubeChange::Watch(tube)),
            Effect::Ignore => Some(TubeChange::Ignore(tube)),
        }
    }
}

/// Check a tube name against the broker's naming rules.
fn validate_tube_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_TUBE_NAME {
        return Err(BeanstalkError::InvalidArgument(format!(
            "tube name must be 1-{} bytes, got {}",
            MAX_TUBE_NAME,
            name.len()
        )));
    }
    if name.starts_with('-') {
        return Err(BeanstalkError::InvalidArgument(format!(
            "tube name may not start with '-': {}",
            name
        )));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-+/;.$_()".contains(c));
    if !valid {
        return Err(BeanstalkError::InvalidArgument(format!(
            "invalid character in tube name: {}",
            name
        )));
    }
    Ok(())
}

/// A fully encoded command, ready for the protocol engine.
pub struct Encoded {
    /// Catalog name of the command.
    pub name: &'static str,
    /// Request bytes.
    pub bytes: Bytes,
    /// Decoder for the reply.
    pub handler: Box<dyn ResponseHandler>,
    /// Session change to record once the broker confirms.
    pub change: Option<TubeChange>,
}

impl std::fmt::Debug for Encoded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoded")
            .field("name", &self.name)
            .field("bytes", &self.bytes)
            .field("change", &self.change)
            .finish()
    }
}

use Param::{Body, Int, Tube};

const STANDARD: &[CommandSpec] = &[
    CommandSpec::new("put", "put", &[Body, Int, Int, Int], ReplyKind::Inserted),
    CommandSpec::new("use", "use", &[Tube], ReplyKind::Using).with_effect(Effect::Use),
    CommandSpec::new("reserve", "reserve", &[], ReplyKind::Reserved),
    CommandSpec::new(
        "reserve_with_timeout",
        "reserve-with-timeout",
        &[Int],
        ReplyKind::Reserved,
    ),
    CommandSpec::new("delete", "delete", &[Int], ReplyKind::Deleted),
    CommandSpec::new("release", "release", &[Int, Int, Int], ReplyKind::Released),
    CommandSpec::new("bury", "bury", &[Int, Int], ReplyKind::Buried),
    CommandSpec::new("touch", "touch", &[Int], ReplyKind::Touched),
    CommandSpec::new("watch", "watch", &[Tube], ReplyKind::Watching).with_effect(Effect::Watch),
    CommandSpec::new("ignore", "ignore", &[Tube], ReplyKind::Watching)
        .with_effect(Effect::Ignore),
    CommandSpec::new("peek", "peek", &[Int], ReplyKind::Found),
    CommandSpec::new("peek_ready", "peek-ready", &[], ReplyKind::Found),
    CommandSpec::new("peek_delayed", "peek-delayed", &[], ReplyKind::Found),
    CommandSpec::new("peek_buried", "peek-buried", &[], ReplyKind::Found),
    CommandSpec::new("kick", "kick", &[Int], ReplyKind::Kicked),
    CommandSpec::new("kick_job", "kick-job", &[Int], ReplyKind::KickedJob),
    CommandSpec::new("stats_job", "stats-job", &[Int], ReplyKind::Stats),
    CommandSpec::new("stats_tube", "stats-tube", &[Tube], ReplyKind::Stats),
    CommandSpec::new("stats", "stats", &[], ReplyKind::Stats),
    CommandSpec::new("list_tubes", "list-tubes", &[], ReplyKind::TubeList),
    CommandSpec::new("list_tube_used", "list-tube-used", &[], ReplyKind::Using),
    CommandSpec::new(
        "list_tubes_watched",
        "list-tubes-watched",
        &[],
        ReplyKind::TubeList,
    ),
    CommandSpec::new("pause_tube", "pause-tube", &[Tube, Int], ReplyKind::Paused),
];

/// Dispatch table from command name to its definition.
#[derive(Debug, Clone)]
pub struct CommandCatalog {
    commands: HashMap<&'static str, CommandSpec>,
}

impl CommandCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Catalog with every command the broker protocol defines.
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        for spec in STANDARD {
            catalog.register(spec.clone());
        }
        catalog
    }

    /// Add or replace a command definition.
    pub fn register(&mut self, spec: CommandSpec) {
        self.commands.insert(spec.name, spec);
    }

    /// Look up a command by name.
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    /// Whether the catalog knows `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// All command names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Encode `name(args...)` and build its reply handler.
    pub fn encode(&self, name: &str, args: &[Arg]) -> Result<Encoded> {
        let spec = self
            .get(name)
            .ok_or_else(|| BeanstalkError::InvalidArgument(format!("unknown command: {}", name)))?;

        let bytes = spec.encode(args)?;
        Ok(Encoded {
            name: spec.name,
            bytes,
            handler: Box::new(ReplyHandler::new(spec.reply)),
            change: spec.tube_change(args),
        })
    }
}

impl Default for CommandCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
