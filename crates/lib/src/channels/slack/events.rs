//! Slack wire types: Socket Mode envelopes and Events API callbacks.
//!
//! Both transports carry the same `event_callback` body; [`inbound_from_callback`]
//! turns it into an [`InboundMessage`] when it is a user-visible message.

use crate::channels::InboundMessage;
use serde::{Deserialize, Serialize};

/// Channel id used for messages that arrive from Slack.
pub const SLACK_CHANNEL_ID: &str = "slack";

/// Message subtypes that still carry a user's text. Anything else (edits, deletes,
/// joins, topic changes) is not a message to answer.
const ANSWERABLE_SUBTYPES: &[&str] = &["bot_message", "thread_broadcast", "file_share"];

/// Socket Mode frame. `hello` and `disconnect` carry no envelope id.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketEnvelope {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default)]
    pub envelope_id: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// Present on `disconnect` (e.g. "refresh_requested", "warning").
    #[serde(default)]
    pub reason: Option<String>,
}

/// Acknowledgement sent back for every enveloped frame.
#[derive(Debug, Clone, Serialize)]
pub struct SocketAck<'a> {
    pub envelope_id: &'a str,
}

/// Events API request body (HTTP mode), also the Socket Mode `events_api` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventsApiBody {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        event: SlackEvent,
    },
    #[serde(other)]
    Unknown,
}

/// The inner event. Only plain message events are answered.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEvent {
    Message(MessageEvent),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl MessageEvent {
    pub fn is_from_bot(&self) -> bool {
        self.bot_id.is_some() || self.subtype.as_deref() == Some("bot_message")
    }

    /// Inbound message for the router, or `None` when there is nothing to answer or nowhere to reply.
    pub fn to_inbound(&self) -> Option<InboundMessage> {
        if let Some(subtype) = self.subtype.as_deref() {
            if !ANSWERABLE_SUBTYPES.contains(&subtype) {
                return None;
            }
        }
        let channel = self.channel.as_deref().filter(|c| !c.is_empty())?;
        Some(InboundMessage {
            channel_id: SLACK_CHANNEL_ID.to_string(),
            conversation_id: channel.to_string(),
            thread_ts: self.thread_ts.clone(),
            author_id: self.user.clone().unwrap_or_default(),
            text: self.text.clone().unwrap_or_default(),
            is_from_bot: self.is_from_bot(),
        })
    }
}

/// Inbound message carried by an `event_callback` body, if any.
pub fn inbound_from_callback(body: &serde_json::Value) -> Option<InboundMessage> {
    match EventsApiBody::deserialize(body) {
        Ok(EventsApiBody::EventCallback {
            event: SlackEvent::Message(msg),
        }) => msg.to_inbound(),
        Ok(_) => None,
        Err(e) => {
            log::debug!("slack: unparseable event callback: {}", e);
            None
        }
    }
}
