//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.brandgpt/config.json`) and environment.
//! Secrets normally come from the environment (`SLACK_BOT_TOKEN`, `OPENAI_API_KEY`, ...);
//! the file only needs to carry what differs from the defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Slack app credentials and delivery mode.
    #[serde(default)]
    pub slack: SlackConfig,

    /// Completion API settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Routing policy and template source.
    #[serde(default)]
    pub bot: BotConfig,

    /// HTTP listener (health probe, Events API endpoint).
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// How Slack delivers events to the bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlackMode {
    /// Socket Mode: outbound WebSocket, no public URL needed. Requires the app token.
    #[default]
    Socket,

    /// Events API: Slack POSTs to `/slack/events`, verified with the signing secret.
    Events,
}

/// Slack credentials. Each token is overridden by its environment variable when set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    /// Bot token (xoxb-...). Overridden by SLACK_BOT_TOKEN.
    pub bot_token: Option<String>,
    /// App-level token (xapp-...) for Socket Mode. Overridden by SLACK_APP_TOKEN.
    pub app_token: Option<String>,
    /// Signing secret for Events API requests. Overridden by SLACK_SIGNING_SECRET.
    pub signing_secret: Option<String>,
    #[serde(default)]
    pub mode: SlackMode,
}

/// OpenAI-compatible completion endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiConfig {
    /// API key. Overridden by OPENAI_API_KEY.
    pub api_key: Option<String>,
    /// Base URL including the version segment (default "https://api.openai.com/v1").
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper bound on one completion call; elapsed calls are answered with the apology.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Which routing policy the bot runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyKind {
    /// Keyword shortcuts, then template replies, then the brand persona completion.
    #[default]
    Brand,
    /// Always ask the model, with the system prompt taken from the template file.
    TemplatePrompt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    #[serde(default)]
    pub policy: PolicyKind,
    /// Optional template file. Missing is fine; relative paths resolve against the working directory.
    #[serde(default = "default_templates_path")]
    pub templates_path: PathBuf,
    /// Template key whose `system` entry is the persona for the templatePrompt policy.
    #[serde(default = "default_system_prompt_key")]
    pub system_prompt_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the HTTP listener (default 3000). Overridden by PORT.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_templates_path() -> PathBuf {
    PathBuf::from("templates.json")
}

fn default_system_prompt_key() -> String {
    "default".to_string()
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openai_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            templates_path: default_templates_path(),
            system_prompt_key: default_system_prompt_key(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Non-empty trimmed value of an environment variable.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| non_empty(&s))
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Env first, then the config value.
fn resolve(env_name: &str, configured: Option<&String>) -> Option<String> {
    env_value(env_name).or_else(|| configured.and_then(|s| non_empty(s)))
}

/// Resolve the Slack bot token: env SLACK_BOT_TOKEN overrides config.
pub fn resolve_bot_token(config: &Config) -> Option<String> {
    resolve("SLACK_BOT_TOKEN", config.slack.bot_token.as_ref())
}

/// Resolve the Slack app-level token: env SLACK_APP_TOKEN overrides config.
pub fn resolve_app_token(config: &Config) -> Option<String> {
    resolve("SLACK_APP_TOKEN", config.slack.app_token.as_ref())
}

/// Resolve the Slack signing secret: env SLACK_SIGNING_SECRET overrides config.
pub fn resolve_signing_secret(config: &Config) -> Option<String> {
    resolve("SLACK_SIGNING_SECRET", config.slack.signing_secret.as_ref())
}

/// Resolve the OpenAI API key: env OPENAI_API_KEY overrides config.
pub fn resolve_openai_key(config: &Config) -> Option<String> {
    resolve("OPENAI_API_KEY", config.openai.api_key.as_ref())
}

/// Resolve the listener port: an explicit `flag` wins, then env PORT (as set by
/// hosting platforms), then config.
pub fn resolve_gateway_port(config: &Config, flag: Option<u16>) -> u16 {
    if let Some(port) = flag {
        return port;
    }
    match env_value("PORT").map(|p| p.parse::<u16>()) {
        Some(Ok(port)) => port,
        Some(Err(_)) => {
            log::warn!("ignoring PORT: not a valid port number");
            config.gateway.port
        }
        None => config.gateway.port,
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("BRANDGPT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".brandgpt").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, or the default path (or BRANDGPT_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Template file location: absolute paths as-is, relative ones against `base` (the working directory).
pub fn resolve_templates_path(config: &Config, base: &Path) -> PathBuf {
    let p = &config.bot.templates_path;
    if p.is_absolute() {
        p.clone()
    } else {
        base.join(p)
    }
}
