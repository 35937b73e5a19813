use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::http::parser::{parse_http_request, ParseError};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::proxy::{Handled, ProxyHandler, Tunnel};

pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: Vec<u8>,
    state: ConnectionState,
    handler: Arc<ProxyHandler>,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Tunneling(Tunnel),
    Closed,
}

/// Outcome of waiting for the next request
pub enum Incoming {
    Request(Request),
    /// The head grew past the limit without terminating
    HeadTooLarge,
    /// Client closed the connection
    Closed,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, handler: Arc<ProxyHandler>) -> Self {
        Self {
            stream,
            peer,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
            handler,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);

            self.state = match state {
                ConnectionState::Reading => match self.read_request().await? {
                    Incoming::Request(req) => ConnectionState::Processing(req),
                    Incoming::HeadTooLarge => {
                        tracing::warn!(peer = %self.peer, "Request head too large");
                        let response = Response::text(
                            StatusCode::RequestHeaderFieldsTooLarge,
                            b"request head too large".to_vec(),
                        );
                        ConnectionState::Writing(ResponseWriter::new(&response), false)
                    }
                    Incoming::Closed => ConnectionState::Closed,
                },

                ConnectionState::Processing(req) => self.handle_request(req).await,

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        ConnectionState::Reading // go back for next request
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Tunneling(tunnel) => {
                    self.relay(tunnel).await?;
                    ConnectionState::Closed
                }

                ConnectionState::Closed => break,
            };
        }

        Ok(())
    }

    pub async fn read_request(&mut self) -> anyhow::Result<Incoming> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request(&self.buffer) {
                Ok((mut request, consumed)) => {
                    self.buffer.drain(..consumed);
                    request.peer_addr = self.peer.to_string();
                    // TLS terminates in front of this listener, if at all
                    request.tls = false;
                    return Ok(Incoming::Request(request));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(ParseError::HeadTooLarge) => return Ok(Incoming::HeadTooLarge),

                Err(e) => {
                    // Malformed request → protocol error
                    return Err(anyhow::anyhow!("HTTP parse error: {:?}", e));
                }
            }

            // Read more data
            let mut temp = [0u8; 1024];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                // Client closed connection
                return Ok(Incoming::Closed);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }

    async fn handle_request(&self, req: Request) -> ConnectionState {
        let wants_keep_alive = req.keep_alive();

        match self.handler.handle(req).await {
            Handled::Respond(response) => {
                // Unframed bodies end at EOF, so the connection cannot be reused
                let keep_alive = wants_keep_alive && response.has_fixed_length();
                ConnectionState::Writing(ResponseWriter::new(&response), keep_alive)
            }
            Handled::Close(response) => ConnectionState::Writing(ResponseWriter::new(&response), false),
            Handled::Tunnel(tunnel) => ConnectionState::Tunneling(tunnel),
        }
    }

    /// Sends the upgrade response, then copies bytes both ways until either side closes.
    async fn relay(&mut self, tunnel: Tunnel) -> anyhow::Result<()> {
        let Tunnel {
            response,
            mut backend,
            early_data,
        } = tunnel;

        ResponseWriter::new(&response).write_to_stream(&mut self.stream).await?;
        self.stream.write_all(&early_data).await?;

        // Client bytes that arrived right behind the upgrade request
        if !self.buffer.is_empty() {
            backend.write_all(&self.buffer).await?;
            self.buffer.clear();
        }

        let (to_backend, to_client) =
            tokio::io::copy_bidirectional(&mut self.stream, &mut backend).await?;
        tracing::debug!(peer = %self.peer, to_backend, to_client, "Tunnel closed");

        Ok(())
    }
}
