//! Put a job into a tube.
//!
//! ```text
//! RUST_LOG=beanstalk_client=debug cargo run --example producer -- emails "hello"
//! ```

use beanstalk_client::{Client, JobOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> beanstalk_client::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let tube = args.next().unwrap_or_else(|| "default".to_string());
    let body = args.next().unwrap_or_else(|| "hello".to_string());
    let host = std::env::var("BEANSTALK_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

    let client = Client::new();
    client.connect(&host, 11300).await?;

    client.use_tube(&tube).await?;
    let id = client.put_with(body, JobOptions::default().priority(100)).await?;
    println!("inserted job {} into {}", id, tube);

    client.disconnect().await;
    Ok(())
}
