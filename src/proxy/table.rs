//! Routing table.
//!
//! [`RoutingTable`] is the lookup seam the resolver depends on. [`StaticTable`]
//! is the implementation built from configured routes: host match first, then
//! the longest matching path prefix.

use anyhow::{Context, Result};
use url::Url;

use crate::config::RouteConfig;

/// Trace tokens longer than this are cut before logging.
const MAX_TRACE_LEN: usize = 16;

/// A selected backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Service the target belongs to
    pub service: String,
    /// Backend base URL
    pub url: Url,
}

/// Maps a request's host and path to a backend.
///
/// Implementations must be safe for concurrent lookups; the proxy shares one
/// table across all connections without extra locking.
pub trait RoutingTable: Send + Sync {
    /// Returns the target for `host` and `path`, or `None` when nothing matches.
    ///
    /// A `trace` token asks the table to log how it reached its decision.
    fn lookup(&self, host: &str, path: &str, trace: Option<&str>) -> Option<Target>;
}

#[derive(Debug, Clone)]
struct Route {
    host: String,
    path_prefix: String,
    target: Target,
}

impl Route {
    fn matches(&self, host: &str, path: &str) -> bool {
        (self.host.is_empty() || self.host.eq_ignore_ascii_case(host))
            && path.starts_with(&self.path_prefix)
    }

    /// Host-specific routes outrank wildcard ones; then longer prefixes win.
    fn rank(&self) -> (bool, usize) {
        (!self.host.is_empty(), self.path_prefix.len())
    }
}

/// Immutable table of configured routes.
#[derive(Debug, Clone, Default)]
pub struct StaticTable {
    routes: Vec<Route>,
}

impl StaticTable {
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self> {
        let routes = routes
            .iter()
            .map(|route| {
                let url = Url::parse(&route.target)
                    .with_context(|| format!("invalid target for service {}", route.service))?;
                Ok(Route {
                    host: route.host.to_ascii_lowercase(),
                    path_prefix: route.path_prefix.clone(),
                    target: Target {
                        service: route.service.clone(),
                        url,
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { routes })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RoutingTable for StaticTable {
    fn lookup(&self, host: &str, path: &str, trace: Option<&str>) -> Option<Target> {
        let trace = trace.map(truncate_trace);
        let bare_host = strip_port(host);

        if let Some(token) = trace {
            tracing::info!(trace = %token, host = %bare_host, path = %path, "Looking up route");
        }

        let mut best: Option<&Route> = None;
        for route in self.routes.iter().filter(|r| r.matches(bare_host, path)) {
            if let Some(token) = trace {
                tracing::info!(
                    trace = %token,
                    service = %route.target.service,
                    route_host = %route.host,
                    path_prefix = %route.path_prefix,
                    "Candidate route"
                );
            }
            if best.is_none_or(|b| route.rank() > b.rank()) {
                best = Some(route);
            }
        }

        if let Some(token) = trace {
            match best {
                Some(route) => tracing::info!(
                    trace = %token,
                    service = %route.target.service,
                    target = %route.target.url,
                    "Route matched"
                ),
                None => tracing::info!(trace = %token, "No route matched"),
            }
        }

        best.map(|route| route.target.clone())
    }
}

/// Removes an optional `:port` suffix, keeping IPv6 brackets intact.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(close) => &host[..=close],
            None => host,
        };
    }
    host.split_once(':').map_or(host, |(name, _)| name)
}

fn truncate_trace(token: &str) -> &str {
    token
        .char_indices()
        .nth(MAX_TRACE_LEN)
        .map_or(token, |(i, _)| &token[..i])
}
