//! Waymark - attributing reverse proxy
//!
//! Stamps forwarding headers on every request, resolves it against a routing
//! table and relays it to the selected backend.

pub mod config;
pub mod http;
pub mod proxy;
pub mod server;
