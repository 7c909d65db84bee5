//! HTTP/WebSocket gateway for live pages.
//!
//! Every WebSocket accepted on the live endpoint gets its own
//! [`live_core::Page`], resolved against the gateway's shared
//! [`live_core::Resolver`]. The page runs until the client disconnects or the
//! server shuts down.

pub mod connection;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;

pub use server::{router, serve, start_gateway};
pub use state::GatewayState;
