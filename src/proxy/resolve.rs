//! Target resolution.

use std::sync::Arc;

use crate::http::headers::TRACE;
use crate::http::request::Request;
use crate::proxy::table::{RoutingTable, Target};

/// Resolves enriched requests to a backend target.
#[derive(Clone)]
pub struct TargetResolver {
    table: Arc<dyn RoutingTable>,
}

impl TargetResolver {
    pub fn new(table: Arc<dyn RoutingTable>) -> Self {
        Self { table }
    }

    /// Looks up the target for `request`.
    ///
    /// The optional `trace` header is passed through to the table. When no
    /// route matches, a single warning naming the host and path is logged and
    /// `None` is returned; there is no default target.
    pub fn resolve(&self, request: &Request) -> Option<Target> {
        let trace = request.header(TRACE).filter(|t| !t.is_empty());
        let host = request.host();
        let path = request.path.as_str();

        let target = self.table.lookup(host, path, trace);
        if target.is_none() {
            tracing::warn!(host = %host, path = %path, "No route");
        }
        target
    }
}
