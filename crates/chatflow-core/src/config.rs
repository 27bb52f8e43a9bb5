use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Top-level chatflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    /// Directory of `<typebot id>.json` files used to resolve typebot links.
    #[serde(default)]
    pub typebots_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_api_host")]
    pub api_host: String,
    /// Simulate integrations instead of performing them.
    #[serde(default)]
    pub is_preview: bool,
    /// Block transitions allowed without surfacing a display or answer wait.
    #[serde(default = "default_max_auto_transitions")]
    pub max_auto_transitions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_host: default_api_host(),
            is_preview: false,
            max_auto_transitions: default_max_auto_transitions(),
        }
    }
}

fn default_api_host() -> String {
    "http://localhost:3000".to_string()
}

fn default_max_auto_transitions() -> usize {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_webhook_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("chatflow/{}", env!("CARGO_PKG_VERSION"))
}

/// Settings for the terminal rendering surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// How long a bubble takes to "appear" before the step settles.
    #[serde(default = "default_bubble_delay_ms")]
    pub bubble_delay_ms: u64,
    /// Print log sink entries inline with the chat.
    #[serde(default)]
    pub show_logs: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            bubble_delay_ms: default_bubble_delay_ms(),
            show_logs: false,
        }
    }
}

fn default_bubble_delay_ms() -> u64 {
    400
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))
    }

    /// Resolve the typebots directory (expand ~).
    pub fn typebots_dir(&self) -> Option<PathBuf> {
        let dir = self.typebots_dir.as_deref()?;
        if let Some(rest) = dir.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return Some(home.join(rest));
            }
        }
        Some(PathBuf::from(dir))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
