//! In-process fake broker for integration tests.
//!
//! Speaks the subset of the beanstalkd protocol the tests use, records every
//! command line per connection, and can be killed and restarted on the same
//! port. Jobs survive a restart. One-shot faults can be armed to answer a
//! command with an error status or to hang up on it.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What to do instead of serving a matching command.
#[derive(Debug, Clone, Copy)]
enum Fault {
    Reply(&'static str),
    Hangup,
}

#[derive(Default)]
struct State {
    /// Command lines (without bodies), one list per accepted connection.
    connections: Vec<Vec<String>>,
    next_id: u64,
    bodies: HashMap<u64, Vec<u8>>,
    ready: HashMap<String, VecDeque<(u64, Vec<u8>)>>,
    /// Armed faults keyed by command line prefix, each used once.
    faults: Vec<(String, Fault)>,
}

impl State {
    fn take_fault(&mut self, line: &str) -> Option<Fault> {
        let index = self
            .faults
            .iter()
            .position(|(prefix, _)| line.starts_with(prefix.as_str()))?;
        Some(self.faults.remove(index).1)
    }
}

pub struct FakeBroker {
    port: u16,
    state: Arc<Mutex<State>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl FakeBroker {
    /// Start on a free port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener)
    }

    /// Start on a specific port.
    pub async fn start_on(port: u16) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        Self::serve(listener)
    }

    fn serve(listener: TcpListener) -> Self {
        let broker = Self {
            port: listener.local_addr().unwrap().port(),
            state: Arc::default(),
            tasks: Arc::default(),
        };
        broker.spawn_accept(listener);
        broker
    }

    fn spawn_accept(&self, listener: TcpListener) {
        let state = self.state.clone();
        let tasks = self.tasks.clone();
        let accept = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let index = {
                    let mut state = state.lock().unwrap();
                    state.connections.push(Vec::new());
                    state.connections.len() - 1
                };
                let conn = tokio::spawn(handle_connection(socket, index, state.clone()));
                tasks.lock().unwrap().push(conn);
            }
        });
        self.tasks.lock().unwrap().push(accept);
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Drop the listener and every open connection.
    pub fn kill(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    /// Listen again on the same port. Jobs and recorded commands are kept.
    pub async fn restart(&self) {
        // The aborted accept task may still hold the socket for a moment.
        let listener = loop {
            match TcpListener::bind(("127.0.0.1", self.port)).await {
                Ok(listener) => break listener,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };
        self.spawn_accept(listener);
    }

    /// Answer the next command starting with `prefix` with `reply` instead
    /// of serving it.
    pub fn fail_next(&self, prefix: &str, reply: &'static str) {
        self.state
            .lock()
            .unwrap()
            .faults
            .push((prefix.to_string(), Fault::Reply(reply)));
    }

    /// Close the connection on the next command starting with `prefix`,
    /// without answering it.
    pub fn hang_up_on(&self, prefix: &str) {
        self.state
            .lock()
            .unwrap()
            .faults
            .push((prefix.to_string(), Fault::Hangup));
    }

    /// Number of connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.state.lock().unwrap().connections.len()
    }

    /// Command lines received on the `index`th connection.
    pub fn commands(&self, index: usize) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .connections
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    /// Every command line received, across connections.
    pub fn all_commands(&self) -> Vec<String> {
        self.state.lock().unwrap().connections.concat()
    }

    /// Bodies of ready jobs in `tube`, oldest first.
    pub fn ready_bodies(&self, tube: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .ready
            .get(tube)
            .map(|jobs| {
                jobs.iter()
                    .map(|(_, body)| String::from_utf8_lossy(body).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Body of the job inserted with `id`.
    pub fn job_body(&self, id: u64) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .bodies
            .get(&id)
            .map(|body| String::from_utf8_lossy(body).into_owned())
    }

    /// Poll until `f` holds, panicking after five seconds.
    pub async fn wait_until<F>(&self, what: &str, f: F)
    where
        F: Fn(&FakeBroker) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !f(self) {
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {}", what);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Per-connection protocol loop.
///
/// A `reserve` with nothing ready stalls the connection: later commands are
/// read and recorded but never answered.
async fn handle_connection(socket: TcpStream, index: usize, state: Arc<Mutex<State>>) {
    let mut socket = BufReader::new(socket);
    let mut used = "default".to_string();
    let mut watched: BTreeSet<String> = BTreeSet::from(["default".to_string()]);
    let mut stalled = false;

    loop {
        let mut line = String::new();
        match socket.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let line = line.trim_end().to_string();
        let fault = {
            let mut state = state.lock().unwrap();
            state.connections[index].push(line.clone());
            state.take_fault(&line)
        };
        match fault {
            Some(Fault::Hangup) => return,
            Some(Fault::Reply(reply)) => {
                if socket.get_mut().write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
                continue;
            }
            None => {}
        }

        let parts: Vec<&str> = line.split(' ').collect();
        let reply = match parts.as_slice() {
            ["put", _pri, _delay, _ttr, len] => {
                let len: usize = len.parse().unwrap();
                let mut body = vec![0u8; len + 2];
                if socket.read_exact(&mut body).await.is_err() {
                    return;
                }
                body.truncate(len);

                let mut state = state.lock().unwrap();
                state.next_id += 1;
                let id = state.next_id;
                state.bodies.insert(id, body.clone());
                state.ready.entry(used.clone()).or_default().push_back((id, body));
                format!("INSERTED {}\r\n", id).into_bytes()
            }
            ["use", tube] => {
                used = tube.to_string();
                format!("USING {}\r\n", used).into_bytes()
            }
            ["watch", tube] => {
                watched.insert(tube.to_string());
                format!("WATCHING {}\r\n", watched.len()).into_bytes()
            }
            ["ignore", tube] => {
                if watched.len() == 1 && watched.contains(*tube) {
                    b"NOT_IGNORED\r\n".to_vec()
                } else {
                    watched.remove(*tube);
                    format!("WATCHING {}\r\n", watched.len()).into_bytes()
                }
            }
            ["reserve"] | ["reserve-with-timeout", _] => {
                let job = {
                    let mut state = state.lock().unwrap();
                    watched
                        .iter()
                        .find_map(|tube| state.ready.get_mut(tube).and_then(|q| q.pop_front()))
                };
                match (job, parts[0]) {
                    (Some((id, body)), _) => {
                        let mut reply = format!("RESERVED {} {}\r\n", id, body.len()).into_bytes();
                        reply.extend_from_slice(&body);
                        reply.extend_from_slice(b"\r\n");
                        reply
                    }
                    (None, "reserve") => {
                        stalled = true;
                        Vec::new()
                    }
                    (None, _) => b"TIMED_OUT\r\n".to_vec(),
                }
            }
            ["delete", _id] => b"DELETED\r\n".to_vec(),
            ["list-tube-used"] => format!("USING {}\r\n", used).into_bytes(),
            ["list-tubes-watched"] => {
                let yaml: String = watched.iter().map(|t| format!("- {}\n", t)).collect();
                let body = format!("---\n{}", yaml);
                format!("OK {}\r\n{}\r\n", body.len(), body).into_bytes()
            }
            ["stats-tube", tube] => {
                let count = state
                    .lock()
                    .unwrap()
                    .ready
                    .get(*tube)
                    .map_or(0, VecDeque::len);
                let body = format!("---\nname: {}\ncurrent-jobs-ready: {}\n", tube, count);
                format!("OK {}\r\n{}\r\n", body.len(), body).into_bytes()
            }
            _ => b"UNKNOWN_COMMAND\r\n".to_vec(),
        };

        if stalled || reply.is_empty() {
            continue;
        }
        if socket.get_mut().write_all(&reply).await.is_err() {
            return;
        }
    }
}
