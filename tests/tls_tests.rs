use std::net::SocketAddr;
use std::time::Duration;

use connect_rs::client;
use connect_rs::tls::TlsWrapper;
use connect_rs::{Connection, DialConfig, Dialer, Error, ErrorKind};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_native_tls::TlsAcceptor;

const TIMEOUT: Duration = Duration::from_secs(5);

fn config(tls_verify: bool) -> DialConfig {
    DialConfig {
        tls_verify,
        ..DialConfig::default().with_timeout(TIMEOUT)
    }
}

fn expect_err<T>(res: Result<T, Error>) -> Error {
    match res {
        Ok(_) => panic!("operation unexpectedly succeeded"),
        Err(e) => e,
    }
}

/// Acceptor for a self-signed certificate issued to `localhost`.
fn acceptor() -> TlsAcceptor {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let identity = native_tls::Identity::from_pkcs8(
        cert.pem().as_bytes(),
        key_pair.serialize_pem().as_bytes(),
    )
    .unwrap();
    TlsAcceptor::from(native_tls::TlsAcceptor::new(identity).unwrap())
}

/// Private CA plus an acceptor for a `localhost` leaf it signed. Returns the CA's DER.
fn ca_signed_acceptor() -> (Vec<u8>, TlsAcceptor) {
    let ca_key = rcgen::KeyPair::generate().unwrap();
    let mut ca_params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "connect-rs test CA");
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let leaf_key = rcgen::KeyPair::generate().unwrap();
    let leaf_params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    let leaf_cert = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

    let identity = native_tls::Identity::from_pkcs8(
        leaf_cert.pem().as_bytes(),
        leaf_key.serialize_pem().as_bytes(),
    )
    .unwrap();
    let acceptor = TlsAcceptor::from(native_tls::TlsAcceptor::new(identity).unwrap());
    (ca_cert.der().to_vec(), acceptor)
}

async fn echo<S: AsyncRead + AsyncWrite + Unpin>(mut s: S) {
    let mut buf = [0u8; 1024];
    loop {
        match s.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if s.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// TLS echo server accepting any number of connections.
async fn tls_echo_server() -> SocketAddr {
    tls_echo_server_with(acceptor()).await
}

async fn tls_echo_server_with(acceptor: TlsAcceptor) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else { break };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(tls) = acceptor.accept(tcp).await {
                    echo(tls).await;
                }
            });
        }
    });
    addr
}

async fn assert_echo(conn: &mut Connection) {
    conn.write_all(b"over tls").await.unwrap();
    let mut buf = [0u8; 8];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"over tls");
}

async fn dial_direct(addr: SocketAddr) -> Connection {
    Dialer::from_proxy_url("", config(true))
        .unwrap()
        .dial("tcp", &addr.to_string())
        .await
        .unwrap()
}

#[tokio::test]
async fn verification_rejects_untrusted_certificate() {
    let addr = tls_echo_server().await;
    let conn = dial_direct(addr).await;
    let err = expect_err(TlsWrapper::new("localhost", false).wrap(conn, TIMEOUT).await);
    assert_eq!(err.kind(), ErrorKind::Tls);
}

#[tokio::test]
async fn trusted_root_accepts_matching_hostname() {
    let (ca, acceptor) = ca_signed_acceptor();
    let addr = tls_echo_server_with(acceptor).await;
    let conn = dial_direct(addr).await;

    let (stream, info) = TlsWrapper::new("localhost", false)
        .with_root_certificate(ca)
        .wrap(conn, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(info.server_name, "localhost");
    let peer = info.peer.expect("peer certificate");
    assert!(peer.issuer.contains("connect-rs test CA"), "{}", peer.issuer);

    let mut conn: Connection = Box::new(stream);
    assert_echo(&mut conn).await;
}

#[tokio::test]
async fn trusted_root_still_rejects_wrong_hostname() {
    let (ca, acceptor) = ca_signed_acceptor();
    let addr = tls_echo_server_with(acceptor).await;
    let conn = dial_direct(addr).await;

    let err = expect_err(
        TlsWrapper::new("wrong.example", false)
            .with_root_certificate(ca)
            .wrap(conn, TIMEOUT)
            .await,
    );
    assert_eq!(err.kind(), ErrorKind::Tls);
}

#[tokio::test]
async fn skip_verify_ignores_wrong_hostname_under_trusted_root() {
    let (ca, acceptor) = ca_signed_acceptor();
    let addr = tls_echo_server_with(acceptor).await;
    let conn = dial_direct(addr).await;

    let (stream, _) = TlsWrapper::new("wrong.example", true)
        .with_root_certificate(ca)
        .wrap(conn, TIMEOUT)
        .await
        .unwrap();
    let mut conn: Connection = Box::new(stream);
    assert_echo(&mut conn).await;
}

#[tokio::test]
async fn skip_verify_accepts_same_certificate() {
    let addr = tls_echo_server().await;
    let conn = Dialer::from_proxy_url("", config(false))
        .unwrap()
        .dial("tcp", &addr.to_string())
        .await
        .unwrap();

    let (stream, info) = TlsWrapper::new("wrong.example", true)
        .wrap(conn, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(info.server_name, "wrong.example");
    let peer = info.peer.expect("peer certificate");
    assert!(peer.subject.contains("rcgen"), "{}", peer.subject);

    let mut conn: Connection = Box::new(stream);
    assert_echo(&mut conn).await;
}

#[tokio::test]
async fn handshake_against_plain_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _server = tokio::spawn(async move {
        let (s, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(s);
    });

    let conn = Dialer::from_proxy_url("", config(false))
        .unwrap()
        .dial("tcp", &addr.to_string())
        .await
        .unwrap();
    let err = expect_err(
        TlsWrapper::new("localhost", true)
            .wrap(conn, Duration::from_millis(200))
            .await,
    );
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

/// HTTPS proxy: TLS to the proxy, then one CONNECT exchange written as a single record,
/// then echo until the client goes away. The handle completes once the client side closes.
async fn stub_https_proxy(reply: &'static [u8]) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = acceptor();
    let handle = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let Ok(mut tls) = acceptor.accept(tcp).await else {
            return;
        };
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if tls.read(&mut byte).await.unwrap() == 0 {
                return;
            }
            head.push(byte[0]);
        }
        assert!(head.starts_with(b"CONNECT example.com:443 HTTP/1.1\r\n"));
        tls.write_all(reply).await.unwrap();
        echo(tls).await;
    });
    (addr, handle)
}

#[tokio::test]
async fn https_proxy_tunnel() {
    let (addr, _) = stub_https_proxy(b"HTTP/1.1 200 Connection established\r\n\r\n").await;
    let dialer = Dialer::from_proxy_url(&format!("https://{addr}"), config(false)).unwrap();
    let mut conn = dialer.dial("tcp", "example.com").await.unwrap();
    assert_echo(&mut conn).await;
}

#[tokio::test]
async fn https_proxy_refusal_is_protocol_error_and_closes_socket() {
    let (addr, proxy) = stub_https_proxy(b"HTTP/1.1 403 Forbidden\r\n\r\n").await;
    let dialer = Dialer::from_proxy_url(&format!("https://{addr}"), config(false)).unwrap();
    let err = expect_err(dialer.dial("tcp", "example.com:443").await);
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(err.to_string().contains("403 Forbidden"));

    // The proxy only returns once it sees the client side closed.
    tokio::time::timeout(TIMEOUT, proxy)
        .await
        .expect("proxy socket left open")
        .unwrap();
}

#[tokio::test]
async fn https_proxy_status_check_is_substring_match() {
    let (addr, _) = stub_https_proxy(b"HTTP/1.1 1200 X\r\n\r\n").await;
    let dialer = Dialer::from_proxy_url(&format!("https://{addr}"), config(false)).unwrap();
    let mut conn = dialer.dial("tcp", "example.com:443").await.unwrap();
    assert_echo(&mut conn).await;
}

#[tokio::test]
async fn https_proxy_drops_bytes_read_with_the_reply() {
    let (addr, _) = stub_https_proxy(b"HTTP/1.1 200 OK\r\n\r\nEARLY").await;
    let dialer = Dialer::from_proxy_url(&format!("https://{addr}"), config(false)).unwrap();
    let mut conn = dialer.dial("tcp", "example.com:443").await.unwrap();
    // The first bytes seen on the tunnel are the echo, not the payload sent with the reply.
    assert_echo(&mut conn).await;
}

#[tokio::test]
async fn https_proxy_with_untrusted_certificate_is_tls_error() {
    let (addr, _) = stub_https_proxy(b"HTTP/1.1 200 OK\r\n\r\n").await;
    let dialer = Dialer::from_proxy_url(&format!("https://{addr}"), config(true)).unwrap();
    let err = expect_err(dialer.dial("tcp", "example.com:443").await);
    assert_eq!(err.kind(), ErrorKind::Tls);
}

#[tokio::test]
async fn tls_to_target_through_http_tunnel() {
    let target = tls_echo_server().await;

    // Plain HTTP proxy that relays to the requested target.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut client, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            client.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        let head = String::from_utf8(head).unwrap();
        let authority = head.split_whitespace().nth(1).unwrap().to_string();
        let mut upstream = tokio::net::TcpStream::connect(authority).await.unwrap();
        client
            .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
            .await
            .unwrap();
        let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
    });

    let established = client::connect(
        "127.0.0.1",
        target.port(),
        &format!("http://{proxy}"),
        &config(false),
        true,
    )
    .await
    .unwrap();
    assert!(established.tls.is_some());
    let mut conn = established.conn;
    assert_echo(&mut conn).await;
}
