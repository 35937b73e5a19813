//! Backend request forwarding
//!
//! Relays an enriched request to the resolved target over a fresh TCP
//! connection and reads the complete response back. A WebSocket upgrade that
//! the backend accepts is handed back as a [`Tunnel`] instead, for the client
//! connection to splice.

use crate::http::headers::{HeaderMap, X_FORWARDED_FOR};
use crate::http::parser::MAX_HEAD_SIZE;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::proxy::addr::split_host_port;
use crate::proxy::table::Target;
use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{error::Elapsed, timeout};

/// Default buffer size for streaming
const BUFFER_SIZE: usize = 8192;

/// Headers that describe a single hop and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Transfer-Encoding",
    "TE",
    "Trailer",
    "Upgrade",
];

/// What the backend answered
#[derive(Debug)]
pub enum Reply {
    /// A complete response; the backend connection is finished
    Complete(Response),
    /// The backend switched protocols; bytes now flow both ways
    Upgraded(Tunnel),
}

/// An accepted upgrade, ready to be spliced onto the client connection
#[derive(Debug)]
pub struct Tunnel {
    /// The `101 Switching Protocols` head to send to the client
    pub response: Response,
    /// Backend connection, positioned after the response head
    pub backend: TcpStream,
    /// Backend bytes read past the head, owed to the client
    pub early_data: Vec<u8>,
}

/// Forwards requests to backend targets
#[derive(Debug, Clone)]
pub struct Forwarder {
    /// Connection timeout duration
    connect_timeout: Duration,

    /// Timeout for sending the request and reading the response
    request_timeout: Duration,
}

impl Forwarder {
    /// Create a new forwarder
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    /// Forward `request` to `target` and return the backend's reply
    ///
    /// For an upgrade the request timeout covers the backend's response head
    /// only; the tunnel itself is not timed.
    pub async fn forward(&self, request: &Request, target: &Target) -> Result<Reply> {
        let url = &target.url;
        let host = url.host_str().context("Target URL missing host")?;
        let port = url.port_or_known_default().unwrap_or(80);
        let addr = format!("{}:{}", host, port);

        tracing::debug!(
            service = %target.service,
            target = %url,
            method = request.method.as_str(),
            path = %request.path,
            "Forwarding request"
        );

        // Connect to backend with timeout
        let stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to backend")?;

        tracing::trace!(backend = %addr, "Connected to backend");

        // Forward request and get response with timeout
        timeout(
            self.request_timeout,
            self.send_request_and_receive_response(stream, request, url),
        )
        .await
        .context("Request timeout")?
    }

    /// Send request to backend and receive its reply
    async fn send_request_and_receive_response(
        &self,
        mut stream: TcpStream,
        request: &Request,
        backend_url: &url::Url,
    ) -> Result<Reply> {
        let request_bytes = self.build_http_request(request, backend_url)?;
        stream.write_all(&request_bytes).await?;
        stream.flush().await?;

        tracing::trace!("Request sent to backend");

        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
        let (status, mut headers) = loop {
            let (status, headers) = read_response_head(&mut stream, &mut buffer).await?;
            if is_interim(status) {
                tracing::trace!(status = status.as_u16(), "Skipping interim response");
                continue;
            }
            break (status, headers);
        };

        if status == StatusCode::SwitchingProtocols {
            if !request.is_websocket() {
                anyhow::bail!("Backend switched protocols without an upgrade request");
            }
            headers.insert("Connection", "Upgrade");
            return Ok(Reply::Upgraded(Tunnel {
                response: Response {
                    status,
                    headers,
                    body: Vec::new(),
                },
                backend: stream,
                early_data: buffer.to_vec(),
            }));
        }

        let body = if response_has_body(&request.method, status) {
            self.read_response_body(&mut stream, &mut buffer, &headers).await?
        } else {
            Vec::new()
        };

        Ok(Reply::Complete(
            ResponseBuilder::new(status).headers(headers).body(body).build(),
        ))
    }

    /// Build HTTP request bytes to send to backend
    ///
    /// Rewrites `Host` to the backend authority, drops hop-by-hop headers and
    /// appends the client IP to `X-Forwarded-For`. WebSocket upgrades already
    /// carry their `X-Forwarded-For` from enrichment and keep their `Upgrade`.
    pub fn build_http_request(&self, request: &Request, backend_url: &url::Url) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let websocket = request.is_websocket();

        let path = if request.path.is_empty() {
            "/"
        } else {
            &request.path
        };

        buffer.extend_from_slice(
            format!("{} {} {}\r\n", request.method.as_str(), path, request.version).as_bytes()
        );

        let mut headers = request.headers.clone();

        if let Some(host) = backend_url.host_str() {
            let host_value = match backend_url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            headers.insert("Host", host_value);
        }

        if !websocket {
            if let Ok((client_ip, _)) = split_host_port(&request.peer_addr) {
                let chain = match headers.get(X_FORWARDED_FOR) {
                    Some(prior) if !prior.is_empty() => format!("{}, {}", prior, client_ip),
                    _ => client_ip.to_string(),
                };
                headers.insert(X_FORWARDED_FOR, chain);
            }
        }

        for name in HOP_BY_HOP {
            headers.remove(name);
        }
        if websocket {
            headers.insert("Connection", "Upgrade");
            headers.insert("Upgrade", "websocket");
        } else {
            headers.insert("Connection", "close");
        }

        for (key, value) in headers.iter() {
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }

        buffer.extend_from_slice(b"\r\n");

        if !request.body.is_empty() {
            buffer.extend_from_slice(&request.body);
        }

        Ok(buffer)
    }

    /// Read response body based on Content-Length, or until the backend closes
    async fn read_response_body(
        &self,
        stream: &mut TcpStream,
        buffer: &mut BytesMut,
        headers: &HeaderMap,
    ) -> Result<Vec<u8>> {
        let content_length = match headers.get("Content-Length") {
            Some(cl) => cl.trim().parse::<usize>().context("Invalid Content-Length from backend")?,
            None => {
                // We always send Connection: close, so EOF ends the body
                let mut body = buffer.split().to_vec();
                stream.read_to_end(&mut body).await?;
                return Ok(body);
            }
        };

        let mut body = Vec::with_capacity(content_length);

        let from_buffer = buffer.len().min(content_length);
        body.extend_from_slice(&buffer[..from_buffer]);
        buffer.advance(from_buffer);

        let mut chunk = [0u8; BUFFER_SIZE];
        while body.len() < content_length {
            let to_read = (content_length - body.len()).min(BUFFER_SIZE);
            let n = stream.read(&mut chunk[..to_read]).await?;

            if n == 0 {
                anyhow::bail!("Connection closed before complete body received");
            }

            body.extend_from_slice(&chunk[..n]);
        }

        Ok(body)
    }
}

/// Read one response head from the backend, leaving later bytes in `buffer`
async fn read_response_head(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
) -> Result<(StatusCode, HeaderMap)> {
    loop {
        if let Some(headers_end) = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
        {
            let head = buffer.split_to(headers_end + 4);
            return parse_response_head(&head);
        }

        if buffer.len() > MAX_HEAD_SIZE {
            anyhow::bail!("Response headers too large");
        }

        let n = stream.read_buf(buffer).await?;
        if n == 0 {
            anyhow::bail!("Connection closed before complete response received");
        }
    }
}

/// 1xx replies other than 101 are followed by the real response
fn is_interim(status: StatusCode) -> bool {
    status != StatusCode::SwitchingProtocols && (100..200).contains(&status.as_u16())
}

/// Whether a response to `method` with `status` carries a body.
///
/// Replies to HEAD and 1xx/204/304 replies never do, whatever their
/// `Content-Length` says.
fn response_has_body(method: &Method, status: StatusCode) -> bool {
    let code = status.as_u16();
    *method != Method::HEAD && !(100..200).contains(&code) && code != 204 && code != 304
}

/// Parse the status line and headers of a backend response
///
/// Connection-scoped headers are dropped; the proxy frames its own
/// connection to the client.
fn parse_response_head(head: &[u8]) -> Result<(StatusCode, HeaderMap)> {
    let head = std::str::from_utf8(head).context("Invalid UTF-8 in response headers")?;
    let mut lines = head.lines();

    let status_line = lines.next().context("Empty response")?;
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next();
    let code = parts
        .next()
        .with_context(|| format!("Invalid status line: {}", status_line))?;
    let status = StatusCode::from_u16(code.parse().context("Invalid status code")?);

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim(), value.trim());
        }
    }
    headers.remove("Connection");
    headers.remove("Keep-Alive");

    Ok((status, headers))
}

/// Map a forwarding failure to the response sent to the client
pub fn error_response(error: &anyhow::Error) -> Response {
    if error.chain().any(|cause| cause.is::<Elapsed>()) {
        Response::text(
            StatusCode::GatewayTimeout,
            b"504 Gateway Timeout\r\n\r\nThe backend server did not respond in time.".to_vec(),
        )
    } else {
        Response::text(
            StatusCode::BadGateway,
            b"502 Bad Gateway\r\n\r\nFailed to reach backend server.".to_vec(),
        )
    }
}
