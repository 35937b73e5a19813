//! Request attribution and forwarding
//!
//! Every request passes through the same stages before it reaches a backend:
//!
//! ```text
//! Request ─▶ enrich (forwarding headers) ─▶ resolve (routing table) ─▶ forward
//!               │                              │
//!               └─ malformed peer ─▶ 500       └─ no route ─▶ no_route_status
//! ```
//!
//! A WebSocket upgrade accepted by the backend leaves the pipeline as a
//! [`forward::Tunnel`] that the connection splices to the client.

pub mod addr;
pub mod enrich;
pub mod forward;
pub mod handler;
pub mod resolve;
pub mod table;

pub use addr::{split_host_port, MalformedPeerAddress};
pub use enrich::{enrich, Proto};
pub use forward::{Forwarder, Reply, Tunnel};
pub use handler::{Handled, ProxyHandler};
pub use resolve::TargetResolver;
pub use table::{RoutingTable, StaticTable, Target};
