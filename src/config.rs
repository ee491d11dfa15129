use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use percent_encoding::percent_decode_str;

use crate::addr::join_host_port;
use crate::error::{Error, Result};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared read-only by every dialer during one dial attempt.
#[derive(Debug, Clone)]
pub struct DialConfig {
    pub connect_timeout: Duration,
    /// Verify certificates presented by TLS peers (HTTPS proxies and TLS targets).
    pub tls_verify: bool,
    /// Emit step-by-step handshake events at info level instead of debug.
    pub verbose: bool,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            tls_verify: true,
            verbose: false,
        }
    }
}

impl DialConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connect timeout, substituting the default for a zero duration.
    pub fn timeout(&self) -> Duration {
        if self.connect_timeout.is_zero() {
            DEFAULT_CONNECT_TIMEOUT
        } else {
            self.connect_timeout
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
    Https,
    /// `socks5` and `socks5h`; both hand the target name to the proxy unresolved.
    Socks5,
}

impl ProxyScheme {
    fn default_port(&self) -> Option<u16> {
        match self {
            ProxyScheme::Http => Some(8080),
            ProxyScheme::Https => Some(443),
            ProxyScheme::Socks5 => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
            ProxyScheme::Socks5 => "socks5",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A parsed `scheme://[user[:password]@]host[:port]` proxy URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySpec {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

impl ProxySpec {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::Config(format!("invalid proxy URL {url:?}: missing scheme")))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" => ProxyScheme::Http,
            "https" => ProxyScheme::Https,
            "socks5" | "socks5h" => ProxyScheme::Socks5,
            "" => return Err(Error::Config(format!("invalid proxy URL {url:?}: empty scheme"))),
            other => return Err(Error::Config(format!("unsupported proxy scheme: {other}"))),
        };

        // Anything after the authority (path, query, fragment) is ignored.
        let authority = rest.split(['/', '?', '#']).next().unwrap_or("");

        let (userinfo, hostport) = match authority.rsplit_once('@') {
            Some((u, h)) => (Some(u), h),
            None => (None, authority),
        };
        let credentials = userinfo
            .map(|info| {
                let (user, pass) = info.split_once(':').unwrap_or((info, ""));
                Ok::<_, Error>(Credentials {
                    username: decode_userinfo(url, user)?,
                    password: decode_userinfo(url, pass)?,
                })
            })
            .transpose()?;

        let (host, port) = split_authority(hostport)
            .ok_or_else(|| Error::Config(format!("invalid proxy URL {url:?}: malformed host")))?;
        if host.is_empty() {
            return Err(Error::Config(format!("invalid proxy URL {url:?}: missing host")));
        }
        let port = match port {
            Some(p) => parse_proxy_port(p)
                .ok_or_else(|| Error::Config(format!("invalid proxy URL {url:?}: bad port {p:?}")))?,
            None => scheme.default_port().ok_or_else(|| {
                Error::Config(format!("{} proxy URL requires an explicit port", scheme.as_str()))
            })?,
        };

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            credentials,
        })
    }

    /// `host:port` of the proxy, suitable for a TCP connect.
    pub fn address(&self) -> String {
        join_host_port(&self.host, self.port)
    }

    /// Value of a `Proxy-Authorization` header, if the URL carried credentials.
    pub fn basic_auth(&self) -> Option<String> {
        self.credentials.as_ref().map(|c| {
            let token = STANDARD.encode(format!("{}:{}", c.username, c.password));
            format!("Basic {token}")
        })
    }
}

/// Credentials are never part of the displayed form.
impl fmt::Display for ProxySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.address())
    }
}

fn split_authority(hostport: &str) -> Option<(&str, Option<&str>)> {
    if let Some(rest) = hostport.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        return match tail {
            "" => Some((host, None)),
            _ => Some((host, Some(tail.strip_prefix(':')?))),
        };
    }
    match hostport.split_once(':') {
        Some((_, port)) if port.contains(':') => None,
        Some((host, port)) => Some((host, Some(port))),
        None => Some((hostport, None)),
    }
}

fn decode_userinfo(url: &str, part: &str) -> Result<String> {
    percent_decode_str(part)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| Error::Config(format!("invalid proxy URL {url:?}: credentials are not UTF-8")))
}

fn parse_proxy_port(s: &str) -> Option<u16> {
    match s.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(p) => Some(p),
    }
}
