use crate::client::DEFAULT_BASE_URL;
use crate::credentials::{ClaudeCredentialsFile, EnvCredential, SourceChain, StaticCredential};
use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const LOCAL_TOKEN_PREFIX: &str = "cb-local-";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Token editors must present as `Authorization: Bearer ...`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_token: Option<String>,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Client model alias -> upstream model.
    #[serde(default = "default_aliases")]
    pub models: HashMap<String, String>,
    /// File this config was read from, if any.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Inline credential. Takes precedence over every other source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(default = "default_credential_env")]
    pub credential_env: String,
    /// Defaults to `~/.claude/.credentials.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            credential: None,
            credential_env: default_credential_env(),
            credentials_file: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            local_token: None,
            default_model: default_model(),
            upstream: UpstreamConfig::default(),
            models: default_aliases(),
            source_path: None,
        }
    }
}

fn default_port() -> u16 {
    4101
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_credential_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_aliases() -> HashMap<String, String> {
    [
        ("gpt-4", "claude-sonnet-4-5-20250929"),
        ("gpt-4o", "claude-sonnet-4-5-20250929"),
        ("gpt-4o-mini", "claude-haiku-3-5-20241022"),
        ("gpt-3.5-turbo", "claude-haiku-3-5-20241022"),
        ("gpt-4-turbo", "claude-opus-4-6"),
    ]
    .into_iter()
    .map(|(alias, model)| (alias.to_string(), model.to_string()))
    .collect()
}

/// A fresh random local token, `cb-local-` followed by 24 hex digits.
pub fn generate_local_token() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{LOCAL_TOKEN_PREFIX}{}", &hex[..24])
}

impl ProxyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let mut config: Self = toml::from_str(&content)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > platform config dir > home dir. Falls back to
    /// defaults when nothing is found.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Return the local token, generating one if the config has none. A newly
    /// generated token is written back to `save_to` so it is stable across restarts.
    pub fn ensure_local_token(&mut self, save_to: &Path) -> Result<String> {
        if let Some(token) = self.local_token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(token.clone());
        }
        let token = generate_local_token();
        self.local_token = Some(token.clone());
        self.save(save_to)?;
        tracing::info!(path = %save_to.display(), "Generated new local token");
        Ok(token)
    }

    /// Load the config, settle the local token, then apply a `--port` override.
    /// The override is applied after any save so it is never persisted.
    /// Returns the config, where it is saved, and the local token.
    pub fn prepare(explicit_path: Option<&Path>, port: Option<u16>) -> Result<(Self, PathBuf, String)> {
        let mut config = Self::find_and_load(explicit_path)?;
        let save_path = config.save_path();
        let local_token = config.ensure_local_token(&save_path)?;
        if let Some(port) = port {
            config.port = port;
        }
        Ok((config, save_path, local_token))
    }

    /// Where a generated token gets persisted: the loaded file, or the platform
    /// config file when running on defaults.
    pub fn save_path(&self) -> PathBuf {
        self.source_path
            .clone()
            .or_else(|| config_search_paths().into_iter().nth(1))
            .unwrap_or_else(|| PathBuf::from("cursor-bridge.toml"))
    }

    /// Credential sources in precedence order: inline value, environment
    /// variable, then the Claude Code login file.
    pub fn credential_source(&self) -> SourceChain {
        let mut chain = SourceChain::new();
        if let Some(credential) = self.upstream.credential.as_ref().filter(|c| !c.trim().is_empty()) {
            chain = chain.with(StaticCredential(credential.clone()));
        }
        if !self.upstream.credential_env.is_empty() {
            chain = chain.with(EnvCredential {
                var: self.upstream.credential_env.clone(),
            });
        }
        let file = self
            .upstream
            .credentials_file
            .clone()
            .or_else(ClaudeCredentialsFile::default_path);
        if let Some(path) = file {
            chain = chain.with(ClaudeCredentialsFile::new(path));
        }
        chain
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("cursor-bridge.toml"));

    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("cursor-bridge")
                    .join("config.toml"),
            );
        }
    } else if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("cursor-bridge").join("config.toml"));
    } else if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("cursor-bridge").join("config.toml"));
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(".cursor-bridge.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
