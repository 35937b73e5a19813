//! Peer address parsing.
//!
//! The transport reports the client as a `host:port` string. IPv6 hosts are
//! bracketed (`[::1]:4000`). The port is not validated beyond being present;
//! only the host is used downstream.

use thiserror::Error;

/// The peer address could not be split into host and port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse {addr}: {reason}")]
pub struct MalformedPeerAddress {
    addr: String,
    reason: &'static str,
}

impl MalformedPeerAddress {
    fn new(addr: &str, reason: &'static str) -> Self {
        Self {
            addr: addr.to_string(),
            reason,
        }
    }

    /// The address that failed to parse.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

/// Splits `addr` into `(host, port)`.
///
/// Brackets around an IPv6 host are stripped. An empty port (`10.0.0.1:`) is
/// accepted; a missing separator, an unbracketed host with colons, or stray
/// brackets are not.
pub fn split_host_port(addr: &str) -> Result<(&str, &str), MalformedPeerAddress> {
    const MISSING_PORT: &str = "missing port in address";
    const TOO_MANY_COLONS: &str = "too many colons in address";

    let colon = addr
        .rfind(':')
        .ok_or_else(|| MalformedPeerAddress::new(addr, MISSING_PORT))?;

    let (host, host_from, port_guard_from) = if addr.starts_with('[') {
        let close = addr
            .find(']')
            .ok_or_else(|| MalformedPeerAddress::new(addr, "missing ']' in address"))?;
        if close + 1 == addr.len() {
            return Err(MalformedPeerAddress::new(addr, MISSING_PORT));
        }
        if close + 1 != colon {
            // the last colon must directly follow the closing bracket
            let reason = if addr.as_bytes()[close + 1] == b':' {
                TOO_MANY_COLONS
            } else {
                MISSING_PORT
            };
            return Err(MalformedPeerAddress::new(addr, reason));
        }
        (&addr[1..close], 1, close + 1)
    } else {
        let host = &addr[..colon];
        if host.contains(':') {
            return Err(MalformedPeerAddress::new(addr, TOO_MANY_COLONS));
        }
        (host, 0, 0)
    };

    if addr[host_from..].contains('[') {
        return Err(MalformedPeerAddress::new(addr, "unexpected '[' in address"));
    }
    if addr[port_guard_from..].contains(']') {
        return Err(MalformedPeerAddress::new(addr, "unexpected ']' in address"));
    }

    Ok((host, &addr[colon + 1..]))
}
