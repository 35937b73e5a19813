//! Per-request proxy pipeline: enrich, resolve, forward.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, ProxyConfig};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::proxy::enrich::enrich;
use crate::proxy::forward::{error_response, Forwarder, Reply, Tunnel};
use crate::proxy::resolve::TargetResolver;
use crate::proxy::table::StaticTable;

/// How the connection finishes a handled request
#[derive(Debug)]
pub enum Handled {
    /// Write the response; the connection may serve another request
    Respond(Response),
    /// Write the response, then close the connection
    Close(Response),
    /// Write the upgrade response, then relay bytes both ways
    Tunnel(Tunnel),
}

/// Handles proxying requests to backend servers
#[derive(Clone)]
pub struct ProxyHandler {
    config: Arc<ProxyConfig>,
    resolver: TargetResolver,
    forwarder: Forwarder,
}

impl ProxyHandler {
    pub fn new(config: Arc<ProxyConfig>, resolver: TargetResolver, forwarder: Forwarder) -> Self {
        Self {
            config,
            resolver,
            forwarder,
        }
    }

    /// Build a handler backed by the configured static routes
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let table = StaticTable::from_config(&cfg.routes)?;
        tracing::info!(routes = table.len(), "Routing table loaded");

        let forwarder = Forwarder::new(
            Duration::from_secs(cfg.timeouts.connect_secs),
            Duration::from_secs(cfg.timeouts.request_secs),
        );

        Ok(Self::new(
            Arc::new(cfg.proxy.clone()),
            TargetResolver::new(Arc::new(table)),
            forwarder,
        ))
    }

    /// Run one request through the pipeline and decide how to answer
    ///
    /// An unparseable peer address aborts with 500 and closes the connection
    /// before anything is forwarded. A missing route answers with the
    /// configured no-route status.
    pub async fn handle(&self, mut request: Request) -> Handled {
        if let Err(e) = enrich(&mut request, &self.config) {
            tracing::error!(error = %e, "Rejecting request");
            return Handled::Close(Response::text(StatusCode::InternalServerError, e.to_string()));
        }

        let Some(target) = self.resolver.resolve(&request) else {
            let status = StatusCode::from_u16(self.config.no_route_status);
            return Handled::Respond(Response::text(status, b"no route".to_vec()));
        };

        match self.forwarder.forward(&request, &target).await {
            Ok(Reply::Complete(response)) => {
                tracing::info!(
                    service = %target.service,
                    status = response.status.as_u16(),
                    method = request.method.as_str(),
                    path = %request.path,
                    "Request forwarded"
                );
                Handled::Respond(response)
            }
            Ok(Reply::Upgraded(tunnel)) => {
                tracing::info!(
                    service = %target.service,
                    path = %request.path,
                    "Upgrade accepted"
                );
                Handled::Tunnel(tunnel)
            }
            Err(e) => {
                tracing::warn!(
                    service = %target.service,
                    target = %target.url,
                    error = %e,
                    "Failed to forward request"
                );
                Handled::Respond(error_response(&e))
            }
        }
    }
}
