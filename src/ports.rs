use crate::error::{Error, Result};

/// Parse a scan port spec into an inclusive `(start, end)` range (1..=65535).
///
/// Supported formats:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
pub fn parse_port_range(s: &str) -> Result<(u16, u16)> {
    let s = s.trim();
    if let Some((a, b)) = s.split_once('-') {
        let start = parse_port(a.trim())
            .map_err(|e| Error::Config(format!("invalid start port in range {s:?}: {e}")))?;
        let end = parse_port(b.trim())
            .map_err(|e| Error::Config(format!("invalid end port in range {s:?}: {e}")))?;
        if start > end {
            return Err(Error::Config(format!(
                "invalid port range {start}-{end} (start > end)"
            )));
        }
        return Ok((start, end));
    }
    let p = parse_port(s)?;
    Ok((p, p))
}

/// Parse a single TCP port number, rejecting 0 and values above 65535.
pub fn parse_port(s: &str) -> Result<u16> {
    let val: u32 = s
        .parse::<u32>()
        .map_err(|e| Error::Config(format!("invalid port value {s:?}: {e}")))?;
    if val == 0 || val > 65535 {
        return Err(Error::Config(format!("port out of range: {val}")));
    }
    Ok(val as u16)
}
