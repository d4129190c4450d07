//! Typed wrappers over [`Client::call`].

use std::time::Duration;

use bytes::Bytes;

use crate::client::Client;
use crate::codec::{Arg, Job, JobStats, Response, ServerStats, Stats, TubeStats};
use crate::error::{BeanstalkError, Result};

/// Default job priority (`2^31`, the middle of the range).
pub const DEFAULT_PRIORITY: u32 = 1 << 31;

/// Default time-to-run in seconds.
pub const DEFAULT_TTR: u32 = 120;

/// Scheduling options for [`Client::put_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Lower is more urgent.
    pub priority: u32,
    /// Seconds before the job becomes ready.
    pub delay: u32,
    /// Seconds a worker may hold the job.
    pub ttr: u32,
}

impl JobOptions {
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay.as_secs() as u32;
        self
    }

    pub fn ttr(mut self, ttr: Duration) -> Self {
        self.ttr = ttr.as_secs() as u32;
        self
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            delay: 0,
            ttr: DEFAULT_TTR,
        }
    }
}

fn unexpected(command: &str, response: Response) -> BeanstalkError {
    BeanstalkError::Decode(format!("unexpected reply to {}: {:?}", command, response))
}

macro_rules! expect_reply {
    ($command:expr, $response:expr, $pattern:pat => $value:expr) => {
        match $response {
            $pattern => Ok($value),
            other => Err(unexpected($command, other)),
        }
    };
}

impl Client {
    /// Put a job with default options into the used tube. Returns its id.
    pub async fn put(&self, body: impl Into<Bytes>) -> Result<u64> {
        self.put_with(body, JobOptions::default()).await
    }

    /// Put a job into the used tube. Returns its id.
    ///
    /// A broker that is out of memory for the job's queue answers
    /// `BURIED <id>`, reported as [`CommandError::Buried`](crate::CommandError::Buried).
    pub async fn put_with(&self, body: impl Into<Bytes>, options: JobOptions) -> Result<u64> {
        let args = [
            Arg::Body(body.into()),
            Arg::from(options.priority),
            Arg::from(options.delay),
            Arg::from(options.ttr),
        ];
        let response = self.call("put", &args).await?;
        expect_reply!("put", response, Response::Inserted(id) => id)
    }

    /// Tube that `put` inserts into. Recorded and replayed on reconnect.
    pub async fn use_tube(&self, tube: &str) -> Result<String> {
        let response = self.call("use", &[Arg::from(tube)]).await?;
        expect_reply!("use", response, Response::Using(tube) => tube)
    }

    /// Block until a job is ready in any watched tube.
    pub async fn reserve(&self) -> Result<Job> {
        let response = self.call("reserve", &[]).await?;
        expect_reply!("reserve", response, Response::Job(job) => job)
    }

    /// Like [`reserve`](Client::reserve), giving up after `timeout`
    /// with [`CommandError::TimedOut`](crate::CommandError::TimedOut).
    pub async fn reserve_with_timeout(&self, timeout: Duration) -> Result<Job> {
        let response = self
            .call("reserve_with_timeout", &[Arg::from(timeout.as_secs())])
            .await?;
        expect_reply!("reserve_with_timeout", response, Response::Job(job) => job)
    }

    pub async fn delete(&self, id: u64) -> Result<()> {
        let response = self.call("delete", &[Arg::from(id)]).await?;
        expect_reply!("delete", response, Response::Deleted => ())
    }

    /// Put a reserved job back into the ready queue.
    pub async fn release(&self, id: u64, priority: u32, delay: Duration) -> Result<()> {
        let args = [
            Arg::from(id),
            Arg::from(priority),
            Arg::from(delay.as_secs()),
        ];
        let response = self.call("release", &args).await?;
        expect_reply!("release", response, Response::Released => ())
    }

    pub async fn bury(&self, id: u64, priority: u32) -> Result<()> {
        let response = self
            .call("bury", &[Arg::from(id), Arg::from(priority)])
            .await?;
        expect_reply!("bury", response, Response::Buried => ())
    }

    /// Ask for more time to work on a reserved job.
    pub async fn touch(&self, id: u64) -> Result<()> {
        let response = self.call("touch", &[Arg::from(id)]).await?;
        expect_reply!("touch", response, Response::Touched => ())
    }

    /// Add a tube to the watch list. Returns the number of watched tubes.
    pub async fn watch(&self, tube: &str) -> Result<u32> {
        let response = self.call("watch", &[Arg::from(tube)]).await?;
        expect_reply!("watch", response, Response::Watching(count) => count)
    }

    /// Remove a tube from the watch list. Returns the number of watched
    /// tubes.
    pub async fn ignore(&self, tube: &str) -> Result<u32> {
        let response = self.call("ignore", &[Arg::from(tube)]).await?;
        expect_reply!("ignore", response, Response::Watching(count) => count)
    }

    pub async fn peek(&self, id: u64) -> Result<Job> {
        let response = self.call("peek", &[Arg::from(id)]).await?;
        expect_reply!("peek", response, Response::Job(job) => job)
    }

    pub async fn peek_ready(&self) -> Result<Job> {
        let response = self.call("peek_ready", &[]).await?;
        expect_reply!("peek_ready", response, Response::Job(job) => job)
    }

    pub async fn peek_delayed(&self) -> Result<Job> {
        let response = self.call("peek_delayed", &[]).await?;
        expect_reply!("peek_delayed", response, Response::Job(job) => job)
    }

    pub async fn peek_buried(&self) -> Result<Job> {
        let response = self.call("peek_buried", &[]).await?;
        expect_reply!("peek_buried", response, Response::Job(job) => job)
    }

    /// Kick up to `bound` buried or delayed jobs in the used tube. Returns
    /// how many were kicked.
    pub async fn kick(&self, bound: u64) -> Result<u64> {
        let response = self.call("kick", &[Arg::from(bound)]).await?;
        expect_reply!("kick", response, Response::Kicked(count) => count)
    }

    pub async fn kick_job(&self, id: u64) -> Result<()> {
        let response = self.call("kick_job", &[Arg::from(id)]).await?;
        expect_reply!("kick_job", response, Response::KickedJob => ())
    }

    pub async fn stats_job(&self, id: u64) -> Result<JobStats> {
        let stats = self.stats_raw("stats_job", &[Arg::from(id)]).await?;
        stats.deserialize()
    }

    pub async fn stats_tube(&self, tube: &str) -> Result<TubeStats> {
        let stats = self.stats_raw("stats_tube", &[Arg::from(tube)]).await?;
        stats.deserialize()
    }

    pub async fn stats(&self) -> Result<ServerStats> {
        let stats = self.stats_raw("stats", &[]).await?;
        stats.deserialize()
    }

    /// Untyped stats, for keys the typed structs do not cover.
    pub async fn stats_raw(&self, command: &str, args: &[Arg]) -> Result<Stats> {
        let response = self.call(command, args).await?;
        expect_reply!(command, response, Response::Stats(stats) => stats)
    }

    pub async fn list_tubes(&self) -> Result<Vec<String>> {
        let response = self.call("list_tubes", &[]).await?;
        expect_reply!("list_tubes", response, Response::Tubes(tubes) => tubes)
    }

    pub async fn list_tube_used(&self) -> Result<String> {
        let response = self.call("list_tube_used", &[]).await?;
        expect_reply!("list_tube_used", response, Response::Using(tube) => tube)
    }

    pub async fn list_tubes_watched(&self) -> Result<Vec<String>> {
        let response = self.call("list_tubes_watched", &[]).await?;
        expect_reply!("list_tubes_watched", response, Response::Tubes(tubes) => tubes)
    }

    /// Stop handing out jobs from `tube` for `delay`.
    pub async fn pause_tube(&self, tube: &str, delay: Duration) -> Result<()> {
        let args = [Arg::from(tube), Arg::from(delay.as_secs())];
        let response = self.call("pause_tube", &args).await?;
        expect_reply!("pause_tube", response, Response::Paused => ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_options_defaults() {
        let options = JobOptions::default();
        assert_eq!(options.priority, 2_147_483_648);
        assert_eq!(options.delay, 0);
        assert_eq!(options.ttr, 120);
    }

    #[test]
    fn test_job_options_setters() {
        let options = JobOptions::default()
            .priority(10)
            .delay(Duration::from_secs(5))
            .ttr(Duration::from_secs(60));
        assert_eq!(
            options,
            JobOptions {
                priority: 10,
                delay: 5,
                ttr: 60
            }
        );
    }

    #[test]
    fn test_unexpected_reply_is_decode_error() {
        let result: Result<u64> =
            expect_reply!("put", Response::Deleted, Response::Inserted(id) => id);
        assert!(matches!(result, Err(BeanstalkError::Decode(_))));
    }
}
