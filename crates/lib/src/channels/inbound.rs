//! Inbound message from a channel: delivered to the gateway for routing.

/// A message from a channel to be answered (at most once) by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel_id: String,
    /// Where the reply goes (Slack channel or DM id).
    pub conversation_id: String,
    /// Set when the message was posted inside a thread; the reply stays in that thread.
    pub thread_ts: Option<String>,
    pub author_id: String,
    pub text: String,
    pub is_from_bot: bool,
}

impl InboundMessage {
    pub fn new(
        channel_id: impl Into<String>,
        conversation_id: impl Into<String>,
        author_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            conversation_id: conversation_id.into(),
            thread_ts: None,
            author_id: author_id.into(),
            text: text.into(),
            is_from_bot: false,
        }
    }
}
