//! Gateway: HTTP listener plus the inbound message processor.
//!
//! Socket mode: the Slack channel pushes messages over its WebSocket loop.
//! Events mode: Slack POSTs signed callbacks to `/slack/events`.
//! Either way every message is routed on its own task and answered at most once.

use crate::channels::slack::events::{inbound_from_callback, EventsApiBody};
use crate::channels::slack::signing;
use crate::channels::{ChannelRegistry, InboundMessage, SlackChannel};
use crate::config::{self, Config, SlackMode};
use crate::llm::OpenAiClient;
use crate::router::{CompletionSettings, ResponseRouter};
use crate::templates::TemplateTable;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

const INBOUND_QUEUE: usize = 64;

/// Shared state for HTTP handlers and the inbound processor.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub router: Arc<ResponseRouter>,
    pub channel_registry: Arc<ChannelRegistry>,
    /// Sender for inbound channel messages (Socket Mode loop, Events API handler).
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    /// When Some, `/slack/events` verifies requests with it. None outside events mode.
    pub signing_secret: Option<String>,
}

/// Build the response router from config: templates from `base_dir`, OpenAI client from the resolved key.
pub fn build_router(config: &Config, base_dir: &Path) -> Result<ResponseRouter> {
    let templates_path = config::resolve_templates_path(config, base_dir);
    let templates = TemplateTable::load(&templates_path);
    let settings = CompletionSettings::from_config(config);
    let api_key = config::resolve_openai_key(config);
    if api_key.is_none() {
        log::warn!("OPENAI_API_KEY is not set; completion requests will be rejected");
    }
    let client = OpenAiClient::new(
        Some(config.openai.base_url.clone()),
        api_key,
        settings.timeout,
    )
    .context("building OpenAI client")?;
    Ok(ResponseRouter::new(
        config.bot.policy.into(),
        templates,
        &config.bot.system_prompt_key,
        Arc::new(client),
        settings,
    ))
}

/// Route one inbound message and send the reply, if any, through its channel.
async fn process_inbound_message(state: GatewayState, msg: InboundMessage) {
    let outcome = state.router.route(&msg).await;
    let Some(reply) = outcome.reply() else {
        log::debug!("inbound: ignored message from {}", msg.author_id);
        return;
    };
    log::debug!(
        "inbound: {} reply for {} in {}",
        outcome.kind(),
        msg.author_id,
        msg.conversation_id
    );
    let Some(handle) = state.channel_registry.get(&msg.channel_id).await else {
        log::warn!("inbound: no channel registered for {}", msg.channel_id);
        return;
    };
    if let Err(e) = handle
        .send_message(&msg.conversation_id, msg.thread_ts.as_deref(), reply)
        .await
    {
        log::warn!("inbound: send_message failed: {}", e);
    }
}

/// Run the gateway with production wiring: OpenAI client, Slack channel, Ctrl+C/SIGTERM shutdown.
/// `port` overrides PORT and the config file. Blocks until shutdown.
pub async fn run_gateway(mut config: Config, port: Option<u16>) -> Result<()> {
    config.gateway.port = config::resolve_gateway_port(&config, port);
    let base_dir = std::env::current_dir().context("resolving working directory")?;
    let router = build_router(&config, &base_dir)?;
    let slack = Arc::new(SlackChannel::new(
        config::resolve_bot_token(&config),
        config::resolve_app_token(&config),
    ));
    serve(config, Arc::new(router), slack, shutdown_signal()).await
}

/// Serve with injected router and channel until `shutdown` completes.
pub async fn serve<F>(
    config: Config,
    router: Arc<ResponseRouter>,
    slack: Arc<SlackChannel>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let mode = config.slack.mode;
    let signing_secret = match mode {
        SlackMode::Events => Some(config::resolve_signing_secret(&config).context(
            "events mode needs a signing secret (set SLACK_SIGNING_SECRET or slack.signingSecret)",
        )?),
        SlackMode::Socket => None,
    };
    if mode == SlackMode::Socket && config::resolve_app_token(&config).is_none() {
        anyhow::bail!(
            "socket mode needs an app-level token (set SLACK_APP_TOKEN or slack.appToken)"
        );
    }
    if config::resolve_bot_token(&config).is_none() {
        log::warn!("SLACK_BOT_TOKEN is not set; replies cannot be posted");
    }

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_QUEUE);
    let channel_registry = Arc::new(ChannelRegistry::new());
    let channel_tasks: Arc<RwLock<Vec<JoinHandle<()>>>> = Arc::new(RwLock::new(Vec::new()));

    let state = GatewayState {
        config: Arc::new(config),
        router,
        channel_registry: channel_registry.clone(),
        inbound_tx: inbound_tx.clone(),
        signing_secret,
    };

    {
        let state_inbound = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                let state = state_inbound.clone();
                tokio::spawn(process_inbound_message(state, msg));
            }
        });
    }

    match slack.auth_test().await {
        Ok(user_id) => log::info!("slack: authenticated as bot user {}", user_id),
        Err(e) => log::warn!("slack auth.test failed: {}", e),
    }
    channel_registry.register(slack.clone()).await;
    if mode == SlackMode::Socket {
        let handle = slack.clone().start_inbound(inbound_tx);
        channel_tasks.write().await.push(handle);
        log::info!("slack channel registered and socket mode loop started");
    } else {
        log::info!("slack channel registered (events mode): POST /slack/events");
    }

    let bind_addr = format!(
        "{}:{}",
        state.config.gateway.bind.trim(),
        state.config.gateway.port
    );
    let mut app = Router::new().route("/", get(health_http));
    if mode == SlackMode::Events {
        app = app.route("/slack/events", post(slack_events));
    }
    let app = app.with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(drain(shutdown, channel_registry, channel_tasks))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Wait for `shutdown`, then stop channel connectors and await their tasks.
async fn drain<F>(
    shutdown: F,
    channel_registry: Arc<ChannelRegistry>,
    channel_tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
) where
    F: Future<Output = ()>,
{
    shutdown.await;
    log::info!("shutdown signal received, stopping channels");
    channel_registry.stop_all().await;
    let handles = {
        let mut g = channel_tasks.write().await;
        std::mem::take(&mut *g)
    };
    for h in handles {
        let _ = h.await;
    }
    log::info!("channel tasks finished");
}

/// Future that completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// POST /slack/events: verifies the signature, answers url_verification, queues message events.
async fn slack_events(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(ref secret) = state.signing_secret else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Err(e) = signing::verify_signature(
        secret,
        header_str(&headers, "X-Slack-Request-Timestamp"),
        &body,
        header_str(&headers, "X-Slack-Signature"),
        chrono::Utc::now().timestamp(),
    ) {
        log::debug!("slack events: rejected request: {}", e);
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    if let Ok(EventsApiBody::UrlVerification { challenge }) = EventsApiBody::deserialize(&value) {
        return Json(json!({ "challenge": challenge })).into_response();
    }
    // Slack re-sends when the first ack was slow; the original delivery is already queued.
    if headers.contains_key("X-Slack-Retry-Num") {
        log::debug!(
            "slack events: skipping retry {}",
            header_str(&headers, "X-Slack-Retry-Num")
        );
        return StatusCode::OK.into_response();
    }
    if let Some(msg) = inbound_from_callback(&value) {
        if state.inbound_tx.send(msg).await.is_err() {
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }
    StatusCode::OK.into_response()
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "mode": match state.config.slack.mode {
            SlackMode::Socket => "socket",
            SlackMode::Events => "events",
        },
        "port": state.config.gateway.port,
    }))
}
