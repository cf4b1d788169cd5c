//! Communication channels (Slack).
//!
//! Channel trait and registry so the gateway can start/stop channel connectors
//! and send replies. Inbound messages are sent to the gateway for routing.

mod inbound;
mod registry;
pub mod slack;

pub use inbound::InboundMessage;
pub use registry::{ChannelHandle, ChannelRegistry};
pub use slack::{SlackChannel, SlackError};
