use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

use super::{connect_tcp, Connection};
use crate::addr::{join_host_port, split_host_port};
use crate::config::{DialConfig, ProxySpec};
use crate::deadline::Deadline;
use crate::error::{Error, Result};

pub(crate) const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

const MAX_HEADER_LINE: u64 = 8 * 1024;

/// Tunnels through a plaintext HTTP proxy with `CONNECT`.
#[derive(Debug, Clone)]
pub struct HttpConnectDialer {
    proxy: ProxySpec,
    config: DialConfig,
}

impl HttpConnectDialer {
    pub fn new(proxy: ProxySpec, config: DialConfig) -> Self {
        Self { proxy, config }
    }

    pub fn proxy(&self) -> &ProxySpec {
        &self.proxy
    }

    pub async fn dial(&self, address: &str) -> Result<Connection> {
        let timeout = self.config.timeout();
        let proxy_addr = self.proxy.address();

        step!(self.config, proxy = %proxy_addr, "connecting to HTTP proxy");
        let stream = connect_tcp(&proxy_addr, &Deadline::after(timeout)).await?;

        let (host, port) = target_host_port(address, "80");
        let request = connect_request(host, port, self.proxy.basic_auth().as_deref());
        step!(self.config, target = %format!("{host}:{port}"), "sending CONNECT request");

        let mut reader = BufReader::new(stream);
        let deadline = Deadline::after(timeout);
        deadline
            .run("send CONNECT request", async {
                reader
                    .get_mut()
                    .write_all(request.as_bytes())
                    .await
                    .map_err(|e| Error::handshake_io("send CONNECT request", e))
            })
            .await?;

        let status = deadline
            .run("read proxy response", read_header_line(&mut reader))
            .await?;
        let status = status.trim();
        step!(self.config, status = %status, "proxy response");

        // Matches any status line containing "200", not only a 200 status code.
        if !status.contains("200") {
            let mut rest = String::new();
            let _ = deadline
                .run("read proxy response", drain_headers(&mut reader, Some(&mut rest)))
                .await;
            tracing::warn!(proxy = %proxy_addr, status = %status, "proxy refused CONNECT");
            drop(reader);
            return Err(Error::Protocol(
                format!("{} {}", status, rest.trim()).trim_end().to_string(),
            ));
        }

        deadline
            .run("read proxy response headers", drain_headers(&mut reader, None))
            .await?;

        tracing::info!(proxy = %proxy_addr, target = %address, "tunnel established");
        // Bytes the proxy sent past the header block stay in the reader's buffer.
        Ok(Box::new(reader))
    }
}

/// Split a tunnel target, falling back to the whole string as host on `default_port`.
pub(crate) fn target_host_port<'a>(address: &'a str, default_port: &'a str) -> (&'a str, &'a str) {
    split_host_port(address).unwrap_or((address, default_port))
}

pub(crate) fn connect_request(host: &str, port: &str, auth: Option<&str>) -> String {
    // IPv6 literals go back in brackets: `CONNECT [::1]:443`.
    let authority = join_host_port(host, port);
    let mut req = format!(
        "CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\nUser-Agent: {USER_AGENT}\r\n"
    );
    if let Some(auth) = auth {
        req.push_str("Proxy-Authorization: ");
        req.push_str(auth);
        req.push_str("\r\n");
    }
    req.push_str("\r\n");
    req
}

/// Read one `\n`-terminated line. A connection closed mid-line is reported as truncated.
async fn read_header_line<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    (&mut *reader)
        .take(MAX_HEADER_LINE)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|e| Error::handshake_io("read proxy response", e))?;
    if buf.last() != Some(&b'\n') {
        if buf.len() as u64 >= MAX_HEADER_LINE {
            return Err(Error::Protocol("proxy response header line too long".into()));
        }
        return Err(Error::handshake_io(
            "read proxy response",
            io::ErrorKind::UnexpectedEof.into(),
        ));
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Consume header lines up to and including the blank line, optionally keeping them.
async fn drain_headers<R>(reader: &mut R, mut keep: Option<&mut String>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = read_header_line(reader).await?;
        if line == "\r\n" || line == "\n" {
            return Ok(());
        }
        if let Some(keep) = keep.as_deref_mut() {
            keep.push_str(&line);
        }
    }
}
