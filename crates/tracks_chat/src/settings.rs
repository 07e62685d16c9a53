use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracks_stream::client::DEFAULT_BASE_URL;

const DEFAULT_UTC_OFFSET: i32 = 9;

/// Client settings loaded from ~/.config/tracks-chat/settings.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Hours east of UTC used for turn timestamps
    pub utc_offset: i32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            utc_offset: DEFAULT_UTC_OFFSET,
        }
    }
}

pub fn settings_path() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    Ok(home
        .join(".config")
        .join("tracks-chat")
        .join("settings.json"))
}

/// Settings file with `TRACKS_BASE_URL`/`TRACKS_API_KEY` applied on top
pub fn load_settings() -> Result<ChatSettings> {
    let mut settings = load_settings_from(&settings_path()?)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

fn load_settings_from(path: &Path) -> Result<ChatSettings> {
    if !path.exists() {
        return Ok(ChatSettings::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    let mut settings: ChatSettings = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse settings from {}", path.display()))?;

    // Allow ${VAR} references so keys need not live in the file
    if let Some(api_key) = &mut settings.api_key {
        if let Some(resolved) = substitute_env_vars(api_key, |name| std::env::var(name).ok()) {
            *api_key = resolved;
        }
    }

    Ok(settings)
}

fn apply_env_overrides(settings: &mut ChatSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(base_url) = lookup("TRACKS_BASE_URL") {
        settings.base_url = base_url;
    }
    if let Some(api_key) = lookup("TRACKS_API_KEY") {
        settings.api_key = Some(api_key);
    }
}

fn substitute_env_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    let mut result = input.to_string();
    let mut changed = false;
    while let Some(start) = result.find("${") {
        let end = start + result[start..].find('}')?;
        let var_value = lookup(&result[start + 2..end])?;
        result.replace_range(start..=end, &var_value);
        changed = true;
    }

    if changed {
        Some(result)
    } else {
        None
    }
}
