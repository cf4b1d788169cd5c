//! Gateway: HTTP listener (health, Slack Events API) and the inbound processor.
//!
//! Single port. Socket mode needs no public URL; the listener then only serves health.

mod server;

pub use server::{build_router, run_gateway, serve, GatewayState};
