use crate::addr::join_host_port;
use crate::config::DialConfig;
use crate::dialer::{Connection, Dialer};
use crate::error::Result;
use crate::tls::{TlsSessionInfo, TlsWrapper};

/// A connection ready for the caller's I/O loop.
pub struct Established {
    pub conn: Connection,
    /// Present when the connection was upgraded to TLS.
    pub tls: Option<TlsSessionInfo>,
}

/// Connect to `host:port`, through `proxy_url` when it is non-empty, then optionally
/// upgrade the resulting stream to TLS with `host` as the server name.
pub async fn connect(
    host: &str,
    port: u16,
    proxy_url: &str,
    config: &DialConfig,
    tls: bool,
) -> Result<Established> {
    let dialer = Dialer::from_proxy_url(proxy_url, config.clone())?;
    let target = join_host_port(host, port);

    match dialer.proxy() {
        Some(proxy) => step!(config, %target, %proxy, via = dialer.name(), tls, "connecting"),
        None => step!(config, %target, tls, "connecting (direct)"),
    }

    let conn = dialer.dial("tcp", &target).await?;
    if !tls {
        return Ok(Established { conn, tls: None });
    }

    let (stream, info) = TlsWrapper::new(host, !config.tls_verify)
        .wrap(conn, config.timeout())
        .await?;
    Ok(Established {
        conn: Box::new(stream),
        tls: Some(info),
    })
}
