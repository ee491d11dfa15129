//! SOCKS5 client handshake (RFC 1928, username/password auth per RFC 1929).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{connect_tcp, Connection};
use crate::addr::{join_host_port, split_host_port};
use crate::config::{Credentials, DialConfig, ProxySpec};
use crate::deadline::Deadline;
use crate::error::{Error, Result, Socks5Reply};

const VERSION5: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;

const METHOD_NONE: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

#[derive(Debug, Clone)]
pub struct Socks5Dialer {
    proxy: ProxySpec,
    config: DialConfig,
}

impl Socks5Dialer {
    pub fn new(proxy: ProxySpec, config: DialConfig) -> Self {
        Self { proxy, config }
    }

    pub fn proxy(&self) -> &ProxySpec {
        &self.proxy
    }

    pub async fn dial(&self, address: &str) -> Result<Connection> {
        let (host, port) = split_host_port(address)
            .ok_or_else(|| Error::Config(format!("socks5 target {address:?} must be host:port")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::Config(format!("socks5 target {address:?} has an invalid port")))?;
        let request = connect_request(host, port)?;

        let timeout = self.config.timeout();
        let proxy_addr = self.proxy.address();
        step!(self.config, proxy = %proxy_addr, "connecting to SOCKS5 proxy");
        let mut stream = connect_tcp(&proxy_addr, &Deadline::after(timeout)).await?;

        let bound = Deadline::after(timeout)
            .run(
                "socks5 handshake",
                handshake(&mut stream, &request, self.proxy.credentials.as_ref(), &self.config),
            )
            .await?;

        tracing::info!(proxy = %proxy_addr, target = %address, bound = %bound, "tunnel established");
        Ok(Box::new(stream))
    }
}

/// Run method negotiation, optional authentication and the CONNECT command over `stream`.
///
/// Returns the address the proxy bound for the outgoing connection.
pub(crate) async fn handshake<S>(
    stream: &mut S,
    request: &[u8],
    credentials: Option<&Credentials>,
    config: &DialConfig,
) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let method = negotiate_method(stream, credentials).await?;
    step!(config, method, "socks5 method selected");

    if method == METHOD_USER_PASS {
        let creds = credentials.ok_or_else(|| {
            Error::Protocol("socks5 proxy selected username/password auth that was not offered".into())
        })?;
        authenticate(stream, creds).await?;
        step!(config, "socks5 authentication succeeded");
    }

    write(stream, request, "send socks5 connect request").await?;
    read_reply(stream).await
}

async fn negotiate_method<S>(stream: &mut S, credentials: Option<&Credentials>) -> Result<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting: &[u8] = if credentials.is_some() {
        &[VERSION5, 2, METHOD_NONE, METHOD_USER_PASS]
    } else {
        &[VERSION5, 1, METHOD_NONE]
    };
    write(stream, greeting, "send socks5 greeting").await?;

    let mut reply = [0u8; 2];
    read_exact(stream, &mut reply, "read socks5 method").await?;
    if reply[0] != VERSION5 {
        return Err(Error::Protocol(format!(
            "unexpected socks version 0x{:02x} in method reply",
            reply[0]
        )));
    }
    match reply[1] {
        METHOD_NONE | METHOD_USER_PASS => Ok(reply[1]),
        METHOD_NO_ACCEPTABLE => Err(Error::Auth(
            "socks5 proxy accepted none of the offered authentication methods".into(),
        )),
        other => Err(Error::Protocol(format!(
            "socks5 proxy selected unsupported method 0x{other:02x}"
        ))),
    }
}

async fn authenticate<S>(stream: &mut S, creds: &Credentials) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let user = creds.username.as_bytes();
    let pass = creds.password.as_bytes();
    let (Ok(ulen), Ok(plen)) = (u8::try_from(user.len()), u8::try_from(pass.len())) else {
        return Err(Error::Config(
            "socks5 username and password must be at most 255 bytes".into(),
        ));
    };

    let mut msg = Vec::with_capacity(3 + user.len() + pass.len());
    msg.push(AUTH_VERSION);
    msg.push(ulen);
    msg.extend_from_slice(user);
    msg.push(plen);
    msg.extend_from_slice(pass);
    write(stream, &msg, "send socks5 credentials").await?;

    let mut reply = [0u8; 2];
    read_exact(stream, &mut reply, "read socks5 auth status").await?;
    if reply[1] != 0x00 {
        return Err(Error::Auth(format!(
            "socks5 proxy rejected credentials (status 0x{:02x})",
            reply[1]
        )));
    }
    Ok(())
}

async fn read_reply<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut head = [0u8; 4];
    read_exact(stream, &mut head, "read socks5 reply").await?;
    let [version, rep, _rsv, atyp] = head;
    if version != VERSION5 {
        return Err(Error::Protocol(format!(
            "unexpected socks version 0x{version:02x} in connect reply"
        )));
    }
    if let Some(reply) = Socks5Reply::from_code(rep) {
        return Err(Error::Socks5Reply(reply));
    }

    let host = match atyp {
        ATYP_IPV4 => {
            let mut b = [0u8; 4];
            read_exact(stream, &mut b, "read socks5 bound address").await?;
            Ipv4Addr::from(b).to_string()
        }
        ATYP_IPV6 => {
            let mut b = [0u8; 16];
            read_exact(stream, &mut b, "read socks5 bound address").await?;
            Ipv6Addr::from(b).to_string()
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            read_exact(stream, &mut len, "read socks5 bound address").await?;
            let mut name = vec![0u8; len[0] as usize];
            read_exact(stream, &mut name, "read socks5 bound address").await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        other => {
            return Err(Error::Protocol(format!(
                "socks5 reply has unknown address type 0x{other:02x}"
            )))
        }
    };
    let mut port = [0u8; 2];
    read_exact(stream, &mut port, "read socks5 bound port").await?;
    Ok(join_host_port(&host, u16::from_be_bytes(port)))
}

/// Encode a CONNECT request. Names are sent as-is for the proxy to resolve; IP literals
/// use their own address types.
pub(crate) fn connect_request(host: &str, port: u16) -> Result<Vec<u8>> {
    let mut req = vec![VERSION5, CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            req.push(ATYP_IPV4);
            req.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            req.push(ATYP_IPV6);
            req.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let len = u8::try_from(host.len())
                .ok()
                .filter(|l| *l > 0)
                .ok_or_else(|| Error::Config(format!("socks5 target host {host:?} must be 1..=255 bytes")))?;
            req.push(ATYP_DOMAIN);
            req.push(len);
            req.extend_from_slice(host.as_bytes());
        }
    }
    req.extend_from_slice(&port.to_be_bytes());
    Ok(req)
}

async fn write<S>(stream: &mut S, buf: &[u8], step: &'static str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(buf)
        .await
        .map_err(|e| Error::handshake_io(step, e))
}

async fn read_exact<S>(stream: &mut S, buf: &mut [u8], step: &'static str) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    stream
        .read_exact(buf)
        .await
        .map(|_| ())
        .map_err(|e| Error::handshake_io(step, e))
}
