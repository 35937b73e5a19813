//! Forwarding header enrichment.
//!
//! Stamps the headers a backend needs to reconstruct the original client
//! connection. Runs once per request, immediately before the request is
//! resolved and forwarded.
//!
//! # Rules
//!
//! Applied in order, after the peer address has been parsed:
//!
//! 1. Operator client-IP header (if configured and not a reserved name), overwritten
//! 2. `X-Real-Ip`, only if absent
//! 3. `X-Forwarded-For`, overwritten, WebSocket upgrades only
//! 4. `X-Forwarded-Proto`, only if absent
//! 5. `X-Forwarded-Port`, only if absent
//! 6. `Forwarded`, synthesized if absent, then extended with `by=` if configured
//! 7. Operator TLS header, overwritten, TLS connections only
//!
//! Step 6 is not idempotent: a second call appends a second `by=` element.
//! Enrich each request exactly once.
//!
//! `X-Forwarded-For` on plain requests is appended by the forwarder, which
//! does not handle upgrades; hence step 3.

use std::fmt;

use crate::config::ProxyConfig;
use crate::http::headers::{FORWARDED, X_FORWARDED_FOR, X_FORWARDED_PORT, X_FORWARDED_PROTO, X_REAL_IP};
use crate::http::request::Request;
use crate::proxy::addr::{split_host_port, MalformedPeerAddress};

/// Client-facing protocol reported to backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Http,
    Https,
    Ws,
    Wss,
}

impl Proto {
    /// Picks the protocol from the two connection facts.
    ///
    /// WebSocket state decides first, TLS second.
    pub fn from_facts(websocket: bool, tls: bool) -> Self {
        match (websocket, tls) {
            (true, true) => Proto::Wss,
            (true, false) => Proto::Ws,
            (false, true) => Proto::Https,
            (false, false) => Proto::Http,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Proto::Http => "http",
            Proto::Https => "https",
            Proto::Ws => "ws",
            Proto::Wss => "wss",
        }
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adds or updates the forwarding headers of `request`.
///
/// Fails only when the peer address is not in `host:port` form, in which case
/// the request is left untouched and must not be forwarded.
pub fn enrich(request: &mut Request, config: &ProxyConfig) -> Result<(), MalformedPeerAddress> {
    let (client_ip, _) = split_host_port(&request.peer_addr)?;
    let client_ip = client_ip.to_string();

    let websocket = request.is_websocket();
    let proto = Proto::from_facts(websocket, request.tls);
    let port = local_port(request.host(), request.tls).to_string();

    let headers = &mut request.headers;

    let ip_header = config.client_ip_header.as_str();
    if !ip_header.is_empty()
        && !ip_header.eq_ignore_ascii_case(X_FORWARDED_FOR)
        && !ip_header.eq_ignore_ascii_case(X_REAL_IP)
    {
        headers.insert(ip_header, client_ip.as_str());
    }

    if headers.is_absent(X_REAL_IP) {
        headers.insert(X_REAL_IP, client_ip.as_str());
    }

    if websocket {
        headers.insert(X_FORWARDED_FOR, client_ip.as_str());
    }

    if headers.is_absent(X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, proto.as_str());
    }

    if headers.is_absent(X_FORWARDED_PORT) {
        headers.insert(X_FORWARDED_PORT, port);
    }

    let mut forwarded = match headers.get(FORWARDED) {
        Some(existing) if !existing.is_empty() => existing.to_string(),
        _ => format!("for={client_ip}; proto={proto}"),
    };
    if !config.local_ip.is_empty() {
        forwarded.push_str("; by=");
        forwarded.push_str(&config.local_ip);
    }
    headers.insert(FORWARDED, forwarded);

    if !config.tls_header.is_empty() && request.tls {
        headers.insert(config.tls_header.as_str(), config.tls_header_value.as_str());
    }

    Ok(())
}

/// Port the client addressed, taken from the `Host` value.
///
/// Falls back to the scheme default when the host names no port. An empty
/// host yields an empty port.
pub fn local_port(host: &str, tls: bool) -> &str {
    if host.is_empty() {
        return "";
    }
    let default = if tls { "443" } else { "80" };

    if let Some(bracketed) = host.strip_prefix('[') {
        return match bracketed.split_once(']') {
            Some((_, rest)) => match rest.strip_prefix(':') {
                Some(port) if !port.is_empty() => port,
                _ => default,
            },
            None => default,
        };
    }

    match host.find(':') {
        Some(n) if n > 0 && n < host.len() - 1 => &host[n + 1..],
        _ => default,
    }
}
