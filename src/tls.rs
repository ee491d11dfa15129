use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_native_tls::TlsStream;

use crate::config::DEFAULT_CONNECT_TIMEOUT;
use crate::deadline::Deadline;
use crate::dialer::Connection;
use crate::error::{Error, Result};

/// A TLS client session over an established connection.
pub type TlsConnection = TlsStream<Connection>;

/// Upgrades an already-established connection (direct or tunneled) to a TLS client session.
#[derive(Debug, Clone)]
pub struct TlsWrapper {
    server_name: String,
    skip_verify: bool,
    root_certificates: Vec<Vec<u8>>,
}

impl TlsWrapper {
    pub fn new(server_name: impl Into<String>, skip_verify: bool) -> Self {
        Self {
            server_name: server_name.into(),
            skip_verify,
            root_certificates: Vec::new(),
        }
    }

    /// Trust an extra DER-encoded root in addition to the system store.
    pub fn with_root_certificate(mut self, der: impl Into<Vec<u8>>) -> Self {
        self.root_certificates.push(der.into());
        self
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Perform the handshake within `timeout` (zero means the default connect timeout).
    ///
    /// On failure `conn` is dropped, closing the underlying socket. The returned session has
    /// no deadline attached.
    pub async fn wrap(
        &self,
        conn: Connection,
        timeout: Duration,
    ) -> Result<(TlsConnection, TlsSessionInfo)> {
        let timeout = if timeout.is_zero() {
            DEFAULT_CONNECT_TIMEOUT
        } else {
            timeout
        };
        tracing::debug!(server_name = %self.server_name, "starting TLS handshake");
        let stream = client_handshake(
            conn,
            &self.server_name,
            self.skip_verify,
            &self.root_certificates,
            &Deadline::after(timeout),
        )
        .await?;

        let info = TlsSessionInfo::from_stream(&stream, &self.server_name);
        tracing::info!(%info, "TLS established");
        Ok((stream, info))
    }
}

/// TLS client handshake over any stream. Certificate and hostname checks are both
/// disabled when `skip_verify` is set. `roots` are DER certificates trusted on top of
/// the system store.
pub(crate) async fn client_handshake<S>(
    stream: S,
    server_name: &str,
    skip_verify: bool,
    roots: &[Vec<u8>],
    deadline: &Deadline,
) -> Result<TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let tls_err = |source| Error::Tls {
        server_name: server_name.to_string(),
        source,
    };
    let mut builder = native_tls::TlsConnector::builder();
    builder
        .danger_accept_invalid_certs(skip_verify)
        .danger_accept_invalid_hostnames(skip_verify);
    for der in roots {
        builder.add_root_certificate(native_tls::Certificate::from_der(der).map_err(tls_err)?);
    }
    let connector = builder.build().map_err(tls_err)?;
    let connector = tokio_native_tls::TlsConnector::from(connector);

    deadline
        .run("tls handshake", async {
            connector.connect(server_name, stream).await.map_err(tls_err)
        })
        .await
}

/// Diagnostic summary of a negotiated session. Nothing in the dial path depends on it.
#[derive(Debug, Clone, Default)]
pub struct TlsSessionInfo {
    pub server_name: String,
    pub peer: Option<PeerCertificate>,
}

#[derive(Debug, Clone)]
pub struct PeerCertificate {
    pub subject: String,
    pub issuer: String,
    pub not_after: String,
}

impl TlsSessionInfo {
    pub fn from_stream<S>(stream: &TlsStream<S>, server_name: &str) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let peer = stream
            .get_ref()
            .peer_certificate()
            .ok()
            .flatten()
            .and_then(|cert| cert.to_der().ok())
            .and_then(|der| PeerCertificate::from_der(&der));
        Self {
            server_name: server_name.to_string(),
            peer,
        }
    }
}

impl PeerCertificate {
    fn from_der(der: &[u8]) -> Option<Self> {
        let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
        Some(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_after: cert
                .validity()
                .not_after
                .to_rfc2822()
                .unwrap_or_else(|e| e),
        })
    }
}

impl fmt::Display for TlsSessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server_name={}", self.server_name)?;
        if let Some(peer) = &self.peer {
            write!(
                f,
                " subject=\"{}\" issuer=\"{}\" not_after=\"{}\"",
                peer.subject, peer.issuer, peer.not_after
            )?;
        }
        Ok(())
    }
}
