//! Slack channel: Socket Mode (WebSocket) inbound and chat.postMessage outbound.
//!
//! Socket Mode needs the app-level token (xapp-...) to open a connection and the bot
//! token (xoxb-...) to post replies. In Events API mode only the bot token is used here;
//! events arrive over HTTP at the gateway.

pub mod events;
pub mod signing;

use crate::channels::inbound::InboundMessage;
use crate::channels::registry::ChannelHandle;
use async_trait::async_trait;
use events::{inbound_from_callback, SocketAck, SocketEnvelope, SLACK_CHANNEL_ID};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const SLACK_API_BASE: &str = "https://slack.com/api";
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("slack request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("slack api error: {0}")]
    Api(String),
    #[error("slack websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("slack payload error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("slack {0} not configured")]
    MissingToken(&'static str),
}

/// Envelope every Web API method answers with.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

/// How one Socket Mode connection ended.
enum SessionEnd {
    /// Server closed or asked us to reconnect, or the channel was stopped.
    Closed,
    /// The gateway dropped its receiver; stop for good.
    InboundClosed,
}

/// Slack channel connector.
pub struct SlackChannel {
    id: String,
    bot_token: Option<String>,
    app_token: Option<String>,
    api_base: String,
    /// `true` once stopped. Keeps its value, so a stop is seen whenever the loop next looks.
    stopped: watch::Sender<bool>,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(bot_token: Option<String>, app_token: Option<String>) -> Self {
        Self::with_api_base(bot_token, app_token, slack_api_base())
    }

    /// Channel against a custom Web API base (tests, proxies).
    pub fn with_api_base(
        bot_token: Option<String>,
        app_token: Option<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            id: SLACK_CHANNEL_ID.to_string(),
            bot_token,
            app_token,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            stopped: watch::Sender::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Completes once `stop` has been called, including before this was awaited.
    async fn wait_stopped(&self) {
        let mut rx = self.stopped.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep before reconnecting; returns early on stop.
    async fn pause(&self) {
        tokio::select! {
            _ = self.wait_stopped() => {}
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }

    /// POST a Web API method with a bearer token; errors when HTTP fails or `ok` is false.
    async fn call(
        &self,
        method: &str,
        token: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Map<String, serde_json::Value>, SlackError> {
        let url = format!("{}/{}", self.api_base, method);
        let mut req = self.client.post(&url).bearer_auth(token);
        if let Some(b) = body {
            req = req.json(b);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(SlackError::Api(format!("{} failed: {} {}", method, status, body)));
        }
        let data: ApiResponse = res.json().await?;
        if !data.ok {
            return Err(SlackError::Api(format!(
                "{} failed: {}",
                method,
                data.error.as_deref().unwrap_or("unknown error")
            )));
        }
        Ok(data.rest)
    }

    fn bot_token(&self) -> Result<&str, SlackError> {
        self.bot_token
            .as_deref()
            .ok_or(SlackError::MissingToken("bot token"))
    }

    /// auth.test with the bot token. Returns the bot's user id.
    pub async fn auth_test(&self) -> Result<String, SlackError> {
        let data = self.call("auth.test", self.bot_token()?, None).await?;
        Ok(data
            .get("user_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    /// apps.connections.open with the app token. Returns the wss:// URL for one connection.
    pub async fn open_socket_url(&self) -> Result<String, SlackError> {
        let token = self
            .app_token
            .as_deref()
            .ok_or(SlackError::MissingToken("app token"))?;
        let data = self.call("apps.connections.open", token, None).await?;
        data.get("url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| SlackError::Api("apps.connections.open returned no url".to_string()))
    }

    /// Post `text` to a conversation via chat.postMessage.
    pub async fn send_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<(), SlackError> {
        let mut body = serde_json::json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = serde_json::Value::String(ts.to_string());
        }
        self.call("chat.postMessage", self.bot_token()?, Some(&body))
            .await?;
        Ok(())
    }

    /// Start the Socket Mode loop and forward messages to the gateway. Returns a handle to await on shutdown.
    pub fn start_inbound(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> JoinHandle<()> {
        self.stopped.send_replace(false);
        log::info!("slack channel: starting socket mode loop");
        tokio::spawn(async move {
            run_socket_loop(self, inbound_tx).await;
        })
    }

    /// One Socket Mode connection: ack every envelope, forward message events, answer pings.
    async fn run_session(
        &self,
        url: &str,
        inbound_tx: &mpsc::Sender<InboundMessage>,
    ) -> Result<SessionEnd, SlackError> {
        let (ws, _) = tokio::select! {
            _ = self.wait_stopped() => return Ok(SessionEnd::Closed),
            res = tokio_tungstenite::connect_async(url) => res?,
        };
        let (mut write, mut read) = ws.split();
        loop {
            let frame = tokio::select! {
                _ = self.wait_stopped() => {
                    let _ = write.close().await;
                    return Ok(SessionEnd::Closed);
                }
                frame = read.next() => frame,
            };
            let Some(frame) = frame else {
                return Ok(SessionEnd::Closed);
            };
            match frame? {
                Message::Text(text) => {
                    let envelope: SocketEnvelope = match serde_json::from_str(&text) {
                        Ok(e) => e,
                        Err(e) => {
                            log::debug!("slack: unparseable socket frame: {}", e);
                            continue;
                        }
                    };
                    if let Some(ref id) = envelope.envelope_id {
                        let ack = serde_json::to_string(&SocketAck { envelope_id: id })?;
                        write.send(Message::Text(ack)).await?;
                    }
                    match envelope.typ.as_str() {
                        "hello" => log::info!("slack: socket mode connected"),
                        "disconnect" => {
                            log::info!(
                                "slack: server requested reconnect ({})",
                                envelope.reason.as_deref().unwrap_or("no reason")
                            );
                            let _ = write.close().await;
                            return Ok(SessionEnd::Closed);
                        }
                        "events_api" => {
                            let inbound = envelope.payload.as_ref().and_then(inbound_from_callback);
                            if let Some(msg) = inbound {
                                let sent = tokio::select! {
                                    _ = self.wait_stopped() => return Ok(SessionEnd::Closed),
                                    sent = inbound_tx.send(msg) => sent,
                                };
                                if sent.is_err() {
                                    return Ok(SessionEnd::InboundClosed);
                                }
                            }
                        }
                        other => log::debug!("slack: ignoring socket frame type {}", other),
                    }
                }
                Message::Ping(data) => write.send(Message::Pong(data)).await?,
                Message::Close(_) => return Ok(SessionEnd::Closed),
                _ => {}
            }
        }
    }
}

async fn run_socket_loop(channel: Arc<SlackChannel>, inbound_tx: mpsc::Sender<InboundMessage>) {
    while !channel.is_stopped() {
        let opened = tokio::select! {
            _ = channel.wait_stopped() => break,
            res = channel.open_socket_url() => res,
        };
        let url = match opened {
            Ok(url) => url,
            Err(e) => {
                log::warn!("slack apps.connections.open error: {}", e);
                channel.pause().await;
                continue;
            }
        };
        match channel.run_session(&url, &inbound_tx).await {
            Ok(SessionEnd::Closed) => log::debug!("slack: socket connection closed"),
            Ok(SessionEnd::InboundClosed) => {
                log::debug!("slack: inbound channel closed, stopping loop");
                return;
            }
            Err(e) => {
                log::warn!("slack socket mode error: {}", e);
                channel.pause().await;
            }
        }
    }
    log::info!("slack channel: socket mode loop stopped");
}

#[async_trait]
impl ChannelHandle for SlackChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.stopped.send_replace(true);
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<(), String> {
        SlackChannel::send_message(self, conversation_id, thread_ts, text)
            .await
            .map_err(|e| e.to_string())
    }
}

/// Slack Web API base URL: SLACK_API_BASE overrides the public endpoint.
pub fn slack_api_base() -> String {
    std::env::var("SLACK_API_BASE").unwrap_or_else(|_| SLACK_API_BASE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel(server: &MockServer) -> SlackChannel {
        SlackChannel::with_api_base(
            Some("xoxb-test".to_string()),
            Some("xapp-test".to_string()),
            server.uri(),
        )
    }

    #[tokio::test]
    async fn send_message_posts_to_channel_and_thread() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(header("authorization", "Bearer xoxb-test"))
            .and(body_partial_json(serde_json::json!({
                "channel": "C1", "text": "hello", "thread_ts": "1.0"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        channel(&server)
            .send_message("C1", Some("1.0"), "hello")
            .await
            .expect("send");
    }

    #[tokio::test]
    async fn api_not_ok_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false, "error": "channel_not_found"
            })))
            .mount(&server)
            .await;

        let err = channel(&server)
            .send_message("C404", None, "hi")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("channel_not_found"), "{err}");
    }

    #[tokio::test]
    async fn open_socket_url_uses_app_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps.connections.open"))
            .and(header("authorization", "Bearer xapp-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true, "url": "wss://wss-primary.slack.com/link/?ticket=abc"
            })))
            .mount(&server)
            .await;

        let url = channel(&server).open_socket_url().await.expect("url");
        assert_eq!(url, "wss://wss-primary.slack.com/link/?ticket=abc");
    }

    #[tokio::test]
    async fn auth_test_returns_bot_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true, "user_id": "UBOT", "user": "brandgpt"
            })))
            .mount(&server)
            .await;

        assert_eq!(channel(&server).auth_test().await.expect("auth"), "UBOT");
    }

    #[tokio::test]
    async fn missing_tokens_are_reported() {
        let c = SlackChannel::with_api_base(None, None, "http://127.0.0.1:9");
        assert!(matches!(
            c.send_message("C1", None, "x").await,
            Err(SlackError::MissingToken("bot token"))
        ));
        assert!(matches!(
            c.open_socket_url().await,
            Err(SlackError::MissingToken("app token"))
        ));
    }

    async fn mock_connections_open(server: &MockServer, ws_url: &str) {
        Mock::given(method("POST"))
            .and(path("/apps.connections.open"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true, "url": ws_url
            })))
            .mount(server)
            .await;
    }

    async fn connections_opened(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/apps.connections.open")
            .count()
    }

    #[tokio::test]
    async fn socket_mode_acks_forwards_pongs_and_reconnects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let ws_url = format!("ws://{}/", listener.local_addr().expect("addr"));
        let (seen_tx, mut seen_rx) = mpsc::channel::<Message>(8);

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream)
                .await
                .expect("handshake");
            ws.send(Message::Text(r#"{"type":"hello","num_connections":1}"#.to_string()))
                .await
                .expect("hello");
            ws.send(Message::Text(
                r#"{"envelope_id":"e-1","type":"events_api","payload":{"type":"event_callback","event":{"type":"message","user":"U1","text":"Where's the Skool link?","channel":"C1"}}}"#
                    .to_string(),
            ))
            .await
            .expect("event");
            ws.send(Message::Ping(vec![7])).await.expect("ping");
            let mut got_ack = false;
            let mut got_pong = false;
            while !(got_ack && got_pong) {
                match ws.next().await {
                    Some(Ok(msg @ Message::Text(_))) => {
                        got_ack = true;
                        let _ = seen_tx.send(msg).await;
                    }
                    Some(Ok(msg @ Message::Pong(_))) => {
                        got_pong = true;
                        let _ = seen_tx.send(msg).await;
                    }
                    Some(Ok(_)) => {}
                    _ => return,
                }
            }
            ws.send(Message::Text(
                r#"{"type":"disconnect","reason":"refresh_requested"}"#.to_string(),
            ))
            .await
            .expect("disconnect");

            let (stream, _) = listener.accept().await.expect("accept again");
            let mut ws = tokio_tungstenite::accept_async(stream)
                .await
                .expect("handshake again");
            while let Some(Ok(_)) = ws.next().await {}
        });

        let server = MockServer::start().await;
        mock_connections_open(&server, &ws_url).await;
        let slack = Arc::new(channel(&server));
        let (inbound_tx, mut inbound_rx) = mpsc::channel(8);
        let handle = slack.clone().start_inbound(inbound_tx);

        let msg = tokio::time::timeout(Duration::from_secs(3), inbound_rx.recv())
            .await
            .expect("inbound within 3s")
            .expect("inbound");
        assert_eq!(msg.conversation_id, "C1");
        assert_eq!(msg.text, "Where's the Skool link?");

        let mut ack = None;
        let mut pong = false;
        for _ in 0..2 {
            match tokio::time::timeout(Duration::from_secs(3), seen_rx.recv()).await {
                Ok(Some(Message::Text(t))) => ack = Some(t),
                Ok(Some(Message::Pong(_))) => pong = true,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(ack.as_deref(), Some(r#"{"envelope_id":"e-1"}"#));
        assert!(pong);

        let mut reopened = false;
        for _ in 0..100 {
            if connections_opened(&server).await >= 2 {
                reopened = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(reopened, "no reconnect after disconnect");

        slack.stop();
        tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("loop ends after stop")
            .expect("join");
    }

    #[tokio::test]
    async fn stop_during_handshake_ends_loop() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let ws_url = format!("ws://{}/", listener.local_addr().expect("addr"));
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                });
            }
        });

        let server = MockServer::start().await;
        mock_connections_open(&server, &ws_url).await;
        let slack = Arc::new(channel(&server));
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);
        let handle = slack.clone().start_inbound(inbound_tx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        slack.stop();
        tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("loop ends after stop")
            .expect("join");
    }

    #[tokio::test]
    async fn stop_cuts_reconnect_pause_short() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps.connections.open"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let slack = Arc::new(channel(&server));
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);
        let handle = slack.clone().start_inbound(inbound_tx);

        // The loop is now failing and pausing between attempts.
        tokio::time::sleep(Duration::from_millis(100)).await;
        slack.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("pause is cut short by stop")
            .expect("join");
    }
}
