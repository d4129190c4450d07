//! Reply decoding.
//!
//! [`ReplyHandler`] is a two-state decoder: it first parses the status line,
//! and for replies that announce a body (`RESERVED`, `FOUND`, `OK`) it asks
//! the engine for exactly `bytes + 2` more bytes and decodes those on the
//! second call.

use std::str;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{HandlerOutcome, ResponseHandler};
use crate::error::{BeanstalkError, CommandError, Result};

/// Success reply expected by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// `INSERTED <id>`
    Inserted,
    /// `USING <tube>`
    Using,
    /// `RESERVED <id> <bytes>` + body
    Reserved,
    /// `FOUND <id> <bytes>` + body
    Found,
    /// `DELETED`
    Deleted,
    /// `RELEASED`
    Released,
    /// `BURIED`
    Buried,
    /// `TOUCHED`
    Touched,
    /// `WATCHING <count>`
    Watching,
    /// `KICKED <count>`
    Kicked,
    /// `KICKED`
    KickedJob,
    /// `PAUSED`
    Paused,
    /// `OK <bytes>` + YAML mapping
    Stats,
    /// `OK <bytes>` + YAML sequence
    TubeList,
}

/// A job as returned by `reserve` and the `peek` family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: u64,
    pub body: Bytes,
}

/// Decoded YAML mapping from a `stats*` reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats(serde_yaml::Mapping);

impl Stats {
    /// Raw value for a key.
    pub fn get(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.0.get(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert into a typed stats struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_yaml::from_value(serde_yaml::Value::Mapping(
            self.0.clone(),
        ))?)
    }
}

/// `stats-job` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobStats {
    pub id: u64,
    pub tube: String,
    pub state: String,
    pub pri: u64,
    pub age: u64,
    pub delay: u64,
    pub ttr: u64,
    pub time_left: u64,
    #[serde(default)]
    pub file: u64,
    pub reserves: u64,
    pub timeouts: u64,
    pub releases: u64,
    pub buries: u64,
    pub kicks: u64,
}

/// `stats-tube` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TubeStats {
    pub name: String,
    pub current_jobs_urgent: u64,
    pub current_jobs_ready: u64,
    pub current_jobs_reserved: u64,
    pub current_jobs_delayed: u64,
    pub current_jobs_buried: u64,
    pub total_jobs: u64,
    pub current_using: u64,
    pub current_waiting: u64,
    pub current_watching: u64,
    pub pause: u64,
    pub cmd_delete: u64,
    pub cmd_pause_tube: u64,
    pub pause_time_left: u64,
}

/// The commonly used subset of `stats` fields. Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerStats {
    pub current_jobs_urgent: u64,
    pub current_jobs_ready: u64,
    pub current_jobs_reserved: u64,
    pub current_jobs_delayed: u64,
    pub current_jobs_buried: u64,
    pub total_jobs: u64,
    pub current_tubes: u64,
    pub current_connections: u64,
    pub current_producers: u64,
    pub current_workers: u64,
    pub current_waiting: u64,
    pub job_timeouts: u64,
    pub max_job_size: u64,
    pub pid: u64,
    pub version: String,
    pub uptime: u64,
    #[serde(default)]
    pub draining: bool,
}

/// A decoded success reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Inserted(u64),
    Using(String),
    Job(Job),
    Deleted,
    Released,
    Buried,
    Touched,
    Watching(u32),
    Kicked(u64),
    KickedJob,
    Paused,
    Stats(Stats),
    Tubes(Vec<String>),
}

/// Body announced by a status line.
#[derive(Debug, Clone, Copy)]
enum Body {
    Job { id: u64, len: usize },
    Yaml { len: usize },
}

/// Reply decoder for one command.
#[derive(Debug)]
pub struct ReplyHandler {
    kind: ReplyKind,
    body: Option<Body>,
}

impl ReplyHandler {
    pub fn new(kind: ReplyKind) -> Self {
        Self { kind, body: None }
    }

    fn on_line(&mut self, chunk: &[u8]) -> Result<HandlerOutcome> {
        let line = chunk
            .strip_suffix(b"\r\n")
            .ok_or_else(|| BeanstalkError::Decode("status line not terminated by CRLF".into()))?;
        let line = str::from_utf8(line)
            .map_err(|_| BeanstalkError::Decode("status line is not UTF-8".into()))?;

        let mut words = line.split(' ');
        let status = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        let complete = |r: Response| -> Result<HandlerOutcome> { Ok(HandlerOutcome::Complete(r)) };

        match (self.kind, status, args.as_slice()) {
            (ReplyKind::Inserted, "INSERTED", [id]) => complete(Response::Inserted(parse_int(id)?)),
            (ReplyKind::Using, "USING", [tube]) => complete(Response::Using(tube.to_string())),
            (ReplyKind::Reserved, "RESERVED", [id, len]) | (ReplyKind::Found, "FOUND", [id, len]) => {
                let body = Body::Job {
                    id: parse_int(id)?,
                    len: parse_len(len)?,
                };
                self.expect_body(body)
            }
            (ReplyKind::Stats, "OK", [len]) | (ReplyKind::TubeList, "OK", [len]) => {
                let body = Body::Yaml {
                    len: parse_len(len)?,
                };
                self.expect_body(body)
            }
            (ReplyKind::Deleted, "DELETED", []) => complete(Response::Deleted),
            (ReplyKind::Released, "RELEASED", []) => complete(Response::Released),
            (ReplyKind::Buried, "BURIED", []) => complete(Response::Buried),
            (ReplyKind::Touched, "TOUCHED", []) => complete(Response::Touched),
            (ReplyKind::Watching, "WATCHING", [count]) => {
                let count = u32::try_from(parse_int(count)?).map_err(|_| {
                    BeanstalkError::Decode(format!("watch count out of range: {}", count))
                })?;
                complete(Response::Watching(count))
            }
            (ReplyKind::Kicked, "KICKED", [count]) => complete(Response::Kicked(parse_int(count)?)),
            (ReplyKind::KickedJob, "KICKED", []) => complete(Response::KickedJob),
            (ReplyKind::Paused, "PAUSED", []) => complete(Response::Paused),

            (_, "BURIED", [id]) => Err(CommandError::Buried(Some(parse_int(id)?)).into()),
            (_, "BURIED", []) => Err(CommandError::Buried(None).into()),
            (_, status, []) => match CommandError::from_status(status) {
                Some(err) => Err(err.into()),
                None => Err(unexpected(self.kind, line)),
            },
            _ => Err(unexpected(self.kind, line)),
        }
    }

    fn expect_body(&mut self, body: Body) -> Result<HandlerOutcome> {
        let len = match body {
            Body::Job { len, .. } | Body::Yaml { len } => len,
        };
        let remaining = len
            .checked_add(2)
            .ok_or_else(|| BeanstalkError::Decode(format!("body length {} out of range", len)))?;
        self.body = Some(body);
        Ok(HandlerOutcome::NeedMore(remaining))
    }

    fn on_body(&mut self, body: Body, chunk: &[u8]) -> Result<HandlerOutcome> {
        let data = chunk
            .strip_suffix(b"\r\n")
            .ok_or_else(|| BeanstalkError::Decode("body not terminated by CRLF".into()))?;

        let response = match body {
            Body::Job { id, len } => {
                check_len(len, data)?;
                Response::Job(Job {
                    id,
                    body: Bytes::copy_from_slice(data),
                })
            }
            Body::Yaml { len } => {
                check_len(len, data)?;
                match self.kind {
                    ReplyKind::TubeList => Response::Tubes(serde_yaml::from_slice(data)?),
                    _ => Response::Stats(Stats(serde_yaml::from_slice(data)?)),
                }
            }
        };
        Ok(HandlerOutcome::Complete(response))
    }
}

impl ResponseHandler for ReplyHandler {
    fn handle(&mut self, chunk: &[u8]) -> HandlerOutcome {
        let result = match self.body.take() {
            None => self.on_line(chunk),
            Some(body) => self.on_body(body, chunk),
        };
        result.unwrap_or_else(HandlerOutcome::Failed)
    }
}

fn parse_int(word: &str) -> Result<u64> {
    word.parse()
        .map_err(|_| BeanstalkError::Decode(format!("expected integer, got {:?}", word)))
}

fn parse_len(word: &str) -> Result<usize> {
    usize::try_from(parse_int(word)?)
        .map_err(|_| BeanstalkError::Decode(format!("body length {} out of range", word)))
}

fn check_len(expected: usize, data: &[u8]) -> Result<()> {
    if data.len() != expected {
        return Err(BeanstalkError::Decode(format!(
            "body length {} does not match announced {}",
            data.len(),
            expected
        )));
    }
    Ok(())
}

fn unexpected(kind: ReplyKind, line: &str) -> BeanstalkError {
    BeanstalkError::Decode(format!("unexpected reply to {:?}: {:?}", kind, line))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(outcome: HandlerOutcome) -> Response {
        match outcome {
            HandlerOutcome::Complete(r) => r,
            other => panic!("expected Complete, got {:?}", other),
        }
    }

    fn failed(outcome: HandlerOutcome) -> BeanstalkError {
        match outcome {
            HandlerOutcome::Failed(e) => e,
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_huge_body_length_is_decode_error() {
        let mut h = ReplyHandler::new(ReplyKind::Reserved);
        let err = failed(h.handle(b"RESERVED 1 18446744073709551615\r\n"));
        assert!(matches!(err, BeanstalkError::Decode(_)));

        let mut h = ReplyHandler::new(ReplyKind::Stats);
        let err = failed(h.handle(b"OK 99999999999999999999\r\n"));
        assert!(matches!(err, BeanstalkError::Decode(_)));
    }

    #[test]
    fn test_watch_count_out_of_range() {
        let mut h = ReplyHandler::new(ReplyKind::Watching);
        let err = failed(h.handle(b"WATCHING 4294967296\r\n"));
        assert!(matches!(err, BeanstalkError::Decode(_)));

        let mut h = ReplyHandler::new(ReplyKind::Watching);
        assert_eq!(
            complete(h.handle(b"WATCHING 4294967295\r\n")),
            Response::Watching(u32::MAX)
        );
    }

    #[test]
    fn test_inserted() {
        let mut h = ReplyHandler::new(ReplyKind::Inserted);
        assert_eq!(complete(h.handle(b"INSERTED 17\r\n")), Response::Inserted(17));
    }

    #[test]
    fn test_reserved_needs_body_then_completes() {
        let mut h = ReplyHandler::new(ReplyKind::Reserved);

        match h.handle(b"RESERVED 5 4\r\n") {
            HandlerOutcome::NeedMore(n) => assert_eq!(n, 6),
            other => panic!("expected NeedMore, got {:?}", other),
        }

        let response = complete(h.handle(b"a\r\nb\r\n"));
        assert_eq!(
            response,
            Response::Job(Job {
                id: 5,
                body: Bytes::from_static(b"a\r\nb"),
            })
        );
    }

    #[test]
    fn test_empty_job_body() {
        let mut h = ReplyHandler::new(ReplyKind::Found);
        assert!(matches!(h.handle(b"FOUND 1 0\r\n"), HandlerOutcome::NeedMore(2)));
        let response = complete(h.handle(b"\r\n"));
        assert!(matches!(response, Response::Job(job) if job.body.is_empty()));
    }

    #[test]
    fn test_body_without_terminator_is_decode_error() {
        let mut h = ReplyHandler::new(ReplyKind::Reserved);
        let _ = h.handle(b"RESERVED 5 2\r\n");
        let err = failed(h.handle(b"abcd"));
        assert!(matches!(err, BeanstalkError::Decode(_)));
    }

    #[test]
    fn test_failure_statuses() {
        let mut h = ReplyHandler::new(ReplyKind::Deleted);
        let err = failed(h.handle(b"NOT_FOUND\r\n"));
        assert_eq!(err.command_error(), Some(&CommandError::NotFound));

        let mut h = ReplyHandler::new(ReplyKind::Inserted);
        let err = failed(h.handle(b"BURIED 9\r\n"));
        assert_eq!(err.command_error(), Some(&CommandError::Buried(Some(9))));

        let mut h = ReplyHandler::new(ReplyKind::Released);
        let err = failed(h.handle(b"BURIED\r\n"));
        assert_eq!(err.command_error(), Some(&CommandError::Buried(None)));

        let mut h = ReplyHandler::new(ReplyKind::Reserved);
        let err = failed(h.handle(b"DEADLINE_SOON\r\n"));
        assert_eq!(err.command_error(), Some(&CommandError::DeadlineSoon));
    }

    #[test]
    fn test_buried_is_success_for_bury() {
        let mut h = ReplyHandler::new(ReplyKind::Buried);
        assert_eq!(complete(h.handle(b"BURIED\r\n")), Response::Buried);
    }

    #[test]
    fn test_unexpected_status_is_decode_error() {
        let mut h = ReplyHandler::new(ReplyKind::Touched);
        let err = failed(h.handle(b"INSERTED 3\r\n"));
        assert!(matches!(err, BeanstalkError::Decode(_)));

        let mut h = ReplyHandler::new(ReplyKind::Touched);
        let err = failed(h.handle(b"TOUCHED"));
        assert!(matches!(err, BeanstalkError::Decode(_)));
    }

    #[test]
    fn test_tube_list() {
        let yaml = b"---\n- default\n- emails\n";
        let mut h = ReplyHandler::new(ReplyKind::TubeList);
        let header = format!("OK {}\r\n", yaml.len());
        assert!(matches!(h.handle(header.as_bytes()), HandlerOutcome::NeedMore(_)));

        let mut body = yaml.to_vec();
        body.extend_from_slice(b"\r\n");
        assert_eq!(
            complete(h.handle(&body)),
            Response::Tubes(vec!["default".to_string(), "emails".to_string()])
        );
    }

    #[test]
    fn test_job_stats() {
        let yaml = "---\nid: 3\ntube: default\nstate: ready\npri: 1024\nage: 2\ndelay: 0\n\
                    ttr: 60\ntime-left: 0\nfile: 0\nreserves: 0\ntimeouts: 0\nreleases: 0\n\
                    buries: 0\nkicks: 0\n";
        let mut h = ReplyHandler::new(ReplyKind::Stats);
        let _ = h.handle(format!("OK {}\r\n", yaml.len()).as_bytes());

        let mut body = yaml.as_bytes().to_vec();
        body.extend_from_slice(b"\r\n");
        let stats = match complete(h.handle(&body)) {
            Response::Stats(stats) => stats,
            other => panic!("expected stats, got {:?}", other),
        };

        let job: JobStats = stats.deserialize().unwrap();
        assert_eq!(job.id, 3);
        assert_eq!(job.tube, "default");
        assert_eq!(job.time_left, 0);
        assert_eq!(stats.get("pri").and_then(|v| v.as_u64()), Some(1024));
    }
}
