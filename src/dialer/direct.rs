use tokio::net::TcpStream;

use super::Connection;
use crate::config::DialConfig;
use crate::deadline::Deadline;
use crate::error::{Error, Result};

/// Plain TCP connection to the target, no proxy involved.
#[derive(Debug, Clone, Default)]
pub struct DirectDialer {
    config: DialConfig,
}

impl DirectDialer {
    pub fn new(config: DialConfig) -> Self {
        Self { config }
    }

    pub async fn dial(&self, address: &str) -> Result<Connection> {
        step!(self.config, target = %address, "connecting directly");
        let deadline = Deadline::after(self.config.timeout());
        let stream = connect_tcp(address, &deadline).await?;
        Ok(Box::new(stream))
    }
}

/// Open a TCP connection to `address`, resolving names as needed, bounded by `deadline`.
pub(crate) async fn connect_tcp(address: &str, deadline: &Deadline) -> Result<TcpStream> {
    deadline
        .run("tcp connect", async {
            TcpStream::connect(address)
                .await
                .map_err(|source| Error::Connect {
                    addr: address.to_string(),
                    source,
                })
        })
        .await
}
