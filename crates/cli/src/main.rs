use brandgpt::channels::{InboundMessage, SlackChannel};
use brandgpt::config::{self, SlackMode};
use brandgpt::llm::OpenAiClient;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "brandgpt")]
#[command(about = "Brand GPT CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Socket,
    Events,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory with a default config and example templates.json.
    Init {
        /// Config file path (default: BRANDGPT_CONFIG_PATH or ~/.brandgpt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the Slack bridge (Socket Mode by default, or the Events API endpoint).
    Run {
        /// Config file path (default: BRANDGPT_CONFIG_PATH or ~/.brandgpt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from PORT, config, or 3000)
        #[arg(long, short)]
        port: Option<u16>,

        /// Event delivery mode (default from config)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },

    /// Route one message locally (keywords, templates, model) and print the reply.
    Ask {
        /// Config file path (default: BRANDGPT_CONFIG_PATH or ~/.brandgpt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Message text
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Check credentials: list OpenAI models and call Slack auth.test.
    Check {
        /// Config file path (default: BRANDGPT_CONFIG_PATH or ~/.brandgpt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("brandgpt {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config, port, mode }) => {
            if let Err(e) = run_bridge(config, port, mode).await {
                log::error!("bridge failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ask { config, text }) => {
            if let Err(e) = run_ask(config, text.join(" ")).await {
                log::error!("ask failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Check { config }) => {
            if let Err(e) = run_check(config).await {
                log::error!("check failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = brandgpt::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_bridge(
    config_path: Option<PathBuf>,
    port: Option<u16>,
    mode: Option<ModeArg>,
) -> anyhow::Result<()> {
    let (mut config, path) = config::load_config(config_path)?;
    log::debug!("using config {}", path.display());
    if let Some(m) = mode {
        config.slack.mode = match m {
            ModeArg::Socket => SlackMode::Socket,
            ModeArg::Events => SlackMode::Events,
        };
    }
    log::info!("⚡ Brand GPT starting ({:?} policy)", config.bot.policy);
    brandgpt::gateway::run_gateway(config, port).await
}

async fn run_ask(config_path: Option<PathBuf>, text: String) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let base_dir = std::env::current_dir()?;
    let router = brandgpt::gateway::build_router(&config, &base_dir)?;
    let outcome = router
        .route(&InboundMessage::new("cli", "local", "cli", text))
        .await;
    match outcome.reply() {
        Some(reply) => println!("{}", reply),
        None => println!("(no reply: empty message)"),
    }
    log::debug!("answered by {}", outcome.kind());
    Ok(())
}

async fn run_check(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let mut failed = false;

    let client = OpenAiClient::new(
        Some(config.openai.base_url.clone()),
        config::resolve_openai_key(&config),
        Duration::from_secs(config.openai.timeout_secs),
    )?;
    match client.list_models().await {
        Ok(models) => {
            let has_model = models.iter().any(|m| m.id == config.openai.model);
            println!(
                "openai: ok ({} models, {} {})",
                models.len(),
                config.openai.model,
                if has_model { "available" } else { "not listed" }
            );
        }
        Err(e) => {
            failed = true;
            println!("openai: {}", e);
        }
    }

    let slack = SlackChannel::new(
        config::resolve_bot_token(&config),
        config::resolve_app_token(&config),
    );
    match slack.auth_test().await {
        Ok(user_id) => println!("slack: ok (bot user {})", user_id),
        Err(e) => {
            failed = true;
            println!("slack: {}", e);
        }
    }

    if failed {
        anyhow::bail!("one or more credentials failed");
    }
    Ok(())
}
