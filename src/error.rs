use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while building a dialer, establishing a connection or upgrading it to TLS.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unsupported network type: {0}")]
    UnsupportedNetwork(String),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("proxy connection failed: {0}")]
    Protocol(String),

    #[error("socks5 proxy refused the request: {0}")]
    Socks5Reply(Socks5Reply),

    #[error("proxy authentication failed: {0}")]
    Auth(String),

    #[error("TLS handshake with {server_name} failed: {source}")]
    Tls {
        server_name: String,
        #[source]
        source: native_tls::Error,
    },

    #[error("{step} timed out after {timeout:?}")]
    Timeout { step: &'static str, timeout: Duration },

    #[error("{step} failed: {source}")]
    Io {
        step: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Coarse classification of [`Error`] used by callers that only care about the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Capability,
    Connect,
    Protocol,
    Auth,
    Tls,
    Timeout,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::UnsupportedNetwork(_) => ErrorKind::Capability,
            Error::Connect { .. } => ErrorKind::Connect,
            Error::Protocol(_) | Error::Socks5Reply(_) => ErrorKind::Protocol,
            Error::Auth(_) => ErrorKind::Auth,
            Error::Tls { .. } => ErrorKind::Tls,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Io { .. } => ErrorKind::Io,
        }
    }

    /// Wrap an I/O failure that happened in the middle of a proxy handshake.
    ///
    /// A peer that hangs up before finishing its reply is a protocol violation, not a transport fault.
    pub(crate) fn handshake_io(step: &'static str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            Error::Protocol(format!("{step}: proxy closed the connection before replying"))
        } else {
            Error::Io { step, source }
        }
    }
}

/// Non-success reply codes of a SOCKS5 CONNECT request (RFC 1928 section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Socks5Reply {
    GeneralFailure,
    NotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
    Unknown(u8),
}

impl Socks5Reply {
    /// Map a reply code to its variant. Returns `None` for 0x00 (success).
    pub fn from_code(code: u8) -> Option<Self> {
        let reply = match code {
            0x00 => return None,
            0x01 => Socks5Reply::GeneralFailure,
            0x02 => Socks5Reply::NotAllowed,
            0x03 => Socks5Reply::NetworkUnreachable,
            0x04 => Socks5Reply::HostUnreachable,
            0x05 => Socks5Reply::ConnectionRefused,
            0x06 => Socks5Reply::TtlExpired,
            0x07 => Socks5Reply::CommandNotSupported,
            0x08 => Socks5Reply::AddressTypeNotSupported,
            other => Socks5Reply::Unknown(other),
        };
        Some(reply)
    }

    pub fn code(&self) -> u8 {
        match self {
            Socks5Reply::GeneralFailure => 0x01,
            Socks5Reply::NotAllowed => 0x02,
            Socks5Reply::NetworkUnreachable => 0x03,
            Socks5Reply::HostUnreachable => 0x04,
            Socks5Reply::ConnectionRefused => 0x05,
            Socks5Reply::TtlExpired => 0x06,
            Socks5Reply::CommandNotSupported => 0x07,
            Socks5Reply::AddressTypeNotSupported => 0x08,
            Socks5Reply::Unknown(code) => *code,
        }
    }

    /// Stable machine-readable identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Socks5Reply::GeneralFailure => "general_failure",
            Socks5Reply::NotAllowed => "not_allowed",
            Socks5Reply::NetworkUnreachable => "network_unreachable",
            Socks5Reply::HostUnreachable => "host_unreachable",
            Socks5Reply::ConnectionRefused => "connection_refused",
            Socks5Reply::TtlExpired => "ttl_expired",
            Socks5Reply::CommandNotSupported => "command_not_supported",
            Socks5Reply::AddressTypeNotSupported => "address_type_not_supported",
            Socks5Reply::Unknown(_) => "unknown",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Socks5Reply::GeneralFailure => "general SOCKS server failure",
            Socks5Reply::NotAllowed => "connection not allowed by ruleset",
            Socks5Reply::NetworkUnreachable => "network unreachable",
            Socks5Reply::HostUnreachable => "host unreachable",
            Socks5Reply::ConnectionRefused => "connection refused",
            Socks5Reply::TtlExpired => "TTL expired",
            Socks5Reply::CommandNotSupported => "command not supported",
            Socks5Reply::AddressTypeNotSupported => "address type not supported",
            Socks5Reply::Unknown(_) => "unknown reply code",
        }
    }
}

impl fmt::Display for Socks5Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.description(), self.code())
    }
}
