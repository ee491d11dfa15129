use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::http::{connect_request, target_host_port};
use super::{connect_tcp, Connection};
use crate::config::{DialConfig, ProxySpec};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::tls;

const RESPONSE_BUF_SIZE: usize = 4096;

/// Tunnels with `CONNECT` through an HTTP proxy that is itself reached over TLS.
#[derive(Debug, Clone)]
pub struct HttpsConnectDialer {
    proxy: ProxySpec,
    config: DialConfig,
}

impl HttpsConnectDialer {
    pub fn new(proxy: ProxySpec, config: DialConfig) -> Self {
        Self { proxy, config }
    }

    pub fn proxy(&self) -> &ProxySpec {
        &self.proxy
    }

    pub async fn dial(&self, address: &str) -> Result<Connection> {
        let timeout = self.config.timeout();
        let proxy_addr = self.proxy.address();

        step!(self.config, proxy = %proxy_addr, "connecting to HTTPS proxy");
        let stream = connect_tcp(&proxy_addr, &Deadline::after(timeout)).await?;

        let mut stream = tls::client_handshake(
            stream,
            &self.proxy.host,
            !self.config.tls_verify,
            &[],
            &Deadline::after(timeout),
        )
        .await?;
        step!(self.config, proxy = %proxy_addr, "TLS connection established to proxy");

        let (host, port) = target_host_port(address, "443");
        let request = connect_request(host, port, self.proxy.basic_auth().as_deref());
        step!(self.config, target = %format!("{host}:{port}"), "sending CONNECT request");

        Deadline::after(timeout)
            .run("send CONNECT request", async {
                stream
                    .write_all(request.as_bytes())
                    .await
                    .map_err(|e| Error::handshake_io("send CONNECT request", e))
            })
            .await?;

        // One read into a fixed buffer: a reply split across TLS records, or longer
        // than the buffer, is only partially inspected.
        let mut buf = [0u8; RESPONSE_BUF_SIZE];
        let n = Deadline::after(timeout)
            .run("read proxy response", async {
                stream
                    .read(&mut buf)
                    .await
                    .map_err(|e| Error::handshake_io("read proxy response", e))
            })
            .await?;
        if n == 0 {
            return Err(Error::Protocol("proxy closed the connection without replying".into()));
        }

        let response = String::from_utf8_lossy(&buf[..n]);
        let status = response.lines().next().unwrap_or_default().trim().to_string();
        step!(self.config, status = %status, "proxy response");

        if !response.contains("200") {
            tracing::warn!(proxy = %proxy_addr, status = %status, "proxy refused CONNECT");
            return Err(Error::Protocol(status));
        }

        tracing::info!(proxy = %proxy_addr, target = %address, "tunnel established");
        Ok(Box::new(stream))
    }
}
