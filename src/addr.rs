/// Split `host:port` or `[v6host]:port` into its parts.
///
/// Returns `None` when there is no port, the port is empty, or an unbracketed host
/// contains further colons.
pub fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        if port.is_empty() || port.contains(':') {
            return None;
        }
        return Some((host, port));
    }
    let (host, port) = addr.rsplit_once(':')?;
    if host.contains(':') || port.is_empty() {
        return None;
    }
    Some((host, port))
}

/// Join a host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: impl std::fmt::Display) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
