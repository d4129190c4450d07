use crate::codec::{Arg, CommandCatalog, TubeChange};
use crate::connection::ConnectionHandle;
use crate::error::Result;
use crate::session::SessionState;

/// Bring a fresh connection to `state`.
///
/// Sends `use`, then each extra `watch`, then `ignore default`, one at a
/// time; each waits for its confirmation before the next goes out. Nothing
/// is sent for the default state. The replayed commands are not recorded
/// again since `state` already reflects them.
///
/// # Errors
///
/// The first failed command aborts the replay with its error.
pub async fn restore(
    conn: &ConnectionHandle,
    catalog: &CommandCatalog,
    state: &SessionState,
) -> Result<()> {
    for change in state.replay_plan() {
        let (name, tube) = match &change {
            TubeChange::Use(tube) => ("use", tube),
            TubeChange::Watch(tube) => ("watch", tube),
            TubeChange::Ignore(tube) => ("ignore", tube),
        };

        let mut encoded = catalog.encode(name, &[Arg::from(tube.as_str())])?;
        encoded.change = None;

        tracing::debug!(connection = conn.id(), command = name, tube = %tube, "restoring");
        conn.send(encoded).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection;
    use crate::error::{BeanstalkError, CommandError};
    use crate::protocol::Engine;
    use crate::session::SharedSession;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Broker that answers each line with the matching canned reply and
    /// returns the lines it saw.
    fn scripted(
        server: tokio::io::DuplexStream,
        replies: Vec<&'static str>,
    ) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut server = BufReader::new(server);
            let mut seen = Vec::new();
            for reply in replies {
                let mut line = String::new();
                if server.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                seen.push(line.trim_end().to_string());
                server.get_mut().write_all(reply.as_bytes()).await.unwrap();
            }
            seen
        })
    }

    fn connect_duplex() -> (ConnectionHandle, tokio::io::DuplexStream, SharedSession) {
        let (client, server) = tokio::io::duplex(4096);
        let session = SharedSession::new();
        let (handle, _task) = connection::spawn(
            client,
            1,
            Engine::with_max_line_length(session.clone(), 1024),
            |_| {},
        );
        (handle, server, session)
    }

    #[tokio::test]
    async fn test_replay_order() {
        let (handle, server, session) = connect_duplex();
        let broker = scripted(
            server,
            vec!["USING jobs\r\n", "WATCHING 2\r\n", "WATCHING 3\r\n", "WATCHING 2\r\n"],
        );

        let mut state = SessionState::new();
        state.apply(&TubeChange::Use("jobs".into()));
        state.apply(&TubeChange::Watch("b".into()));
        state.apply(&TubeChange::Watch("a".into()));
        state.apply(&TubeChange::Ignore("default".into()));

        restore(&handle, &CommandCatalog::standard(), &state)
            .await
            .unwrap();

        assert_eq!(
            broker.await.unwrap(),
            vec!["use jobs", "watch a", "watch b", "ignore default"]
        );
        // Replay does not touch the live session state.
        assert!(session.snapshot().is_default());
    }

    #[tokio::test]
    async fn test_default_state_sends_nothing() {
        let (handle, _server, _) = connect_duplex();
        restore(&handle, &CommandCatalog::standard(), &SessionState::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failure_stops_replay() {
        let (handle, server, _) = connect_duplex();
        let broker = scripted(server, vec!["OUT_OF_MEMORY\r\n", "WATCHING 2\r\n"]);

        let mut state = SessionState::new();
        state.apply(&TubeChange::Use("jobs".into()));
        state.apply(&TubeChange::Watch("a".into()));

        let err = restore(&handle, &CommandCatalog::standard(), &state)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BeanstalkError::Command(CommandError::OutOfMemory)
        ));

        handle.close();
        assert_eq!(broker.await.unwrap(), vec!["use jobs"]);
    }
}
