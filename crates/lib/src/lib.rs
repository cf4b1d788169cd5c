//! Brand GPT core library: routing policy, templates, OpenAI client, Slack channel,
//! and the gateway used by the CLI.

pub mod channels;
pub mod config;
pub mod gateway;
pub mod init;
pub mod llm;
pub mod policy;
pub mod router;
pub mod templates;
