//! Work jobs from a tube forever, surviving broker restarts.
//!
//! ```text
//! RUST_LOG=beanstalk_client=info cargo run --example consumer -- emails
//! ```

use std::time::Duration;

use beanstalk_client::{Client, SessionEvent};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> beanstalk_client::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let tube = std::env::args().nth(1).unwrap_or_else(|| "default".to_string());
    let host = std::env::var("BEANSTALK_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

    let client = Client::builder()
        .consume_disconnects(false)
        .max_delay(Duration::from_secs(30))
        .build();

    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::Connected => tracing::info!("session ready"),
                SessionEvent::Disconnected { reason } => tracing::warn!("offline: {}", reason),
            }
        }
    });

    // Keep going through a failed first attempt; retries run in the background.
    if let Err(e) = client.connect(&host, 11300).await {
        tracing::warn!("initial connect failed: {}", e);
    }

    client.watch(&tube).await?;
    if tube != "default" {
        client.ignore("default").await?;
    }

    loop {
        let job = match client.reserve().await {
            Ok(job) => job,
            // Resubmit after a drop; the watch list is restored for us.
            Err(e) if e.is_transport() => continue,
            Err(e) => return Err(e),
        };

        println!("job {}: {}", job.id, String::from_utf8_lossy(&job.body));
        client.touch(job.id).await?;
        client.delete(job.id).await?;
    }
}
