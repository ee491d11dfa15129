//! Library crate for connect-rs: proxy-aware dialing, TLS upgrade and TCP port scanning.

/// Log a handshake step at info level when the dial config asks for verbose output, debug otherwise.
macro_rules! step {
    ($config:expr, $($arg:tt)+) => {
        if $config.verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

pub mod addr;
pub mod client;
pub mod config;
pub mod deadline;
pub mod dialer;
pub mod error;
pub mod ports;
pub mod scanner;
pub mod tls;
pub mod types;

pub use config::{DialConfig, ProxyScheme, ProxySpec};
pub use dialer::{Connection, Dialer};
pub use error::{Error, ErrorKind, Result, Socks5Reply};
