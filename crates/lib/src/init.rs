//! Initialize the configuration directory: create ~/.brandgpt, a default config, and example templates.
//!
//! The written config points `bot.templatesPath` at the seeded `templates.json`, so
//! editing that file is enough to change canned replies.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;

static DEFAULT_TEMPLATES: &str = include_str!("../config/templates.json");

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `templates.json` with example entries if missing.
/// - Writes `config.json` (defaults, templatesPath set to the file above) if missing.
///
/// Secrets are never written; they come from the environment.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    let templates_path = config_dir.join("templates.json");
    if !templates_path.exists() {
        std::fs::write(&templates_path, DEFAULT_TEMPLATES)
            .with_context(|| format!("writing templates to {}", templates_path.display()))?;
        log::info!("wrote example templates to {}", templates_path.display());
    } else {
        log::debug!(
            "templates already exist at {}, skipping",
            templates_path.display()
        );
    }

    if !config_path.exists() {
        let mut config = Config::default();
        config.bot.templates_path = templates_path;
        let body = serde_json::to_string_pretty(&config).context("serializing default config")?;
        std::fs::write(config_path, body)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    Ok(config_dir.to_path_buf())
}
