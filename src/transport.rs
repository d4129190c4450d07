//! TCP transport.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use beanstalk_client::transport;
//!
//! let stream = transport::connect("127.0.0.1", 11300, Duration::from_secs(5)).await?;
//! ```

use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{BeanstalkError, Result};

/// Default broker port.
pub const DEFAULT_PORT: u16 = 11300;

/// Open a TCP connection to the broker.
///
/// Nagle is disabled since every request is a small line the broker should
/// see right away.
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addr = format!("{}:{}", host, port);

    let stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(BeanstalkError::ConnectFailed {
                addr,
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(BeanstalkError::ConnectFailed {
                addr,
                reason: format!("timed out after {:?}", timeout),
            })
        }
    };

    stream.set_nodelay(true)?;
    Ok(stream)
}
