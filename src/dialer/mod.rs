//! Connection establishment strategies.
//!
//! A [`Dialer`] is chosen once from the proxy URL and then used for every dial; each
//! variant owns its own handshake and returns a plain byte stream to the target.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::{DialConfig, ProxyScheme, ProxySpec};
use crate::error::{Error, Result};

mod direct;
mod http;
mod https;
mod socks5;

pub use direct::DirectDialer;
pub use http::HttpConnectDialer;
pub use https::HttpsConnectDialer;
pub use socks5::Socks5Dialer;

pub(crate) use direct::connect_tcp;

/// Any bidirectional byte stream: a TCP socket, a TLS session, or a tunnel through either.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// An established connection. Dropping it closes the underlying socket.
pub type Connection = Box<dyn AsyncStream>;

#[derive(Debug, Clone)]
pub enum Dialer {
    Direct(DirectDialer),
    HttpConnect(HttpConnectDialer),
    HttpsConnect(HttpsConnectDialer),
    Socks5(Socks5Dialer),
}

impl Dialer {
    /// Build the dialer matching `proxy_url`; an empty URL means a direct connection.
    ///
    /// Fails with a configuration error before any network I/O if the URL cannot be parsed
    /// or names an unsupported scheme.
    pub fn from_proxy_url(proxy_url: &str, config: DialConfig) -> Result<Self> {
        if proxy_url.trim().is_empty() {
            return Ok(Self::from_spec(None, config));
        }
        let spec = ProxySpec::parse(proxy_url)?;
        Ok(Self::from_spec(Some(spec), config))
    }

    pub fn from_spec(spec: Option<ProxySpec>, config: DialConfig) -> Self {
        match spec {
            None => Dialer::Direct(DirectDialer::new(config)),
            Some(spec) => match spec.scheme {
                ProxyScheme::Http => Dialer::HttpConnect(HttpConnectDialer::new(spec, config)),
                ProxyScheme::Https => Dialer::HttpsConnect(HttpsConnectDialer::new(spec, config)),
                ProxyScheme::Socks5 => Dialer::Socks5(Socks5Dialer::new(spec, config)),
            },
        }
    }

    /// Connect to `address` (`host:port`). Only the `tcp` network is supported.
    pub async fn dial(&self, network: &str, address: &str) -> Result<Connection> {
        check_network(network)?;
        match self {
            Dialer::Direct(d) => d.dial(address).await,
            Dialer::HttpConnect(d) => d.dial(address).await,
            Dialer::HttpsConnect(d) => d.dial(address).await,
            Dialer::Socks5(d) => d.dial(address).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialer::Direct(_) => "direct",
            Dialer::HttpConnect(_) => "http-connect",
            Dialer::HttpsConnect(_) => "https-connect",
            Dialer::Socks5(_) => "socks5",
        }
    }

    pub fn proxy(&self) -> Option<&ProxySpec> {
        match self {
            Dialer::Direct(_) => None,
            Dialer::HttpConnect(d) => Some(d.proxy()),
            Dialer::HttpsConnect(d) => Some(d.proxy()),
            Dialer::Socks5(d) => Some(d.proxy()),
        }
    }
}

fn check_network(network: &str) -> Result<()> {
    if network == "tcp" {
        Ok(())
    } else {
        Err(Error::UnsupportedNetwork(network.to_string()))
    }
}
