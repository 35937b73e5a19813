use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use crate::http::connection::Connection;
use crate::config::Config;
use crate::proxy::ProxyHandler;

pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    info!("Listening on {}", cfg.listen_addr);

    let handler = Arc::new(ProxyHandler::from_config(cfg)?);
    serve(listener, handler).await
}

/// Accept connections on an already bound listener, one task per client.
pub async fn serve(listener: TcpListener, handler: Arc<ProxyHandler>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Accepted connection from {}", peer);

        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, peer, handler);
            if let Err(e) = conn.run().await {
                tracing::error!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
