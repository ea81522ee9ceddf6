use serde::Deserialize;
use std::time::Duration;

use crate::core::entities::ModelDescriptor;

pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Relay configuration, loaded from TOML and then overridden from the environment.
#[derive(Clone, Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub defaults: ChatDefaults,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default = "default_models")]
    pub models: Vec<ModelDescriptor>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed origins; `*` allows any.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Whole-call deadline for blocking requests.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum silence between two chunks of a streamed response.
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatDefaults {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Limits {
    /// Decoded size cap for `file_data`.
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_api_version() -> String {
    "2023-06-01".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_stream_idle_timeout_secs() -> u64 {
    60
}

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_attachment_bytes() -> usize {
    10 * 1024 * 1024
}

fn descriptor(id: &str, name: &str, description: &str) -> ModelDescriptor {
    ModelDescriptor {
        id: id.to_string(),
        display_name: name.to_string(),
        description: description.to_string(),
    }
}

pub fn default_models() -> Vec<ModelDescriptor> {
    vec![
        descriptor(
            "claude-3-5-sonnet-20241022",
            "Claude 3.5 Sonnet",
            "Latest and most capable model with advanced reasoning",
        ),
        descriptor(
            "claude-3-opus-20240229",
            "Claude 3 Opus",
            "Most powerful model for complex tasks",
        ),
        descriptor(
            "claude-3-sonnet-20240229",
            "Claude 3 Sonnet",
            "Balanced performance and speed",
        ),
        descriptor(
            "claude-3-haiku-20240307",
            "Claude 3 Haiku",
            "Fastest and most cost-effective model",
        ),
    ]
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            defaults: ChatDefaults::default(),
            limits: Limits::default(),
            models: default_models(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_version: default_api_version(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

impl Default for ChatDefaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }
}

impl Limits {
    /// Request body cap: the base64 form of the largest attachment plus room for history.
    pub fn max_body_bytes(&self) -> usize {
        self.max_attachment_bytes.div_ceil(3) * 4 + 2 * 1024 * 1024
    }
}

impl RelayConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Overrides from `HOST`, `PORT`, `CORS_ORIGINS` and `ANTHROPIC_BASE_URL`.
    pub fn apply_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!(%port, "ignoring unparsable PORT"),
            }
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(url) = lookup("ANTHROPIC_BASE_URL") {
            self.upstream.base_url = url;
        }
        self
    }
}

/// Reads `$RELAY_CONFIG` (default `config/relay.toml`). A missing file yields defaults.
pub async fn load() -> anyhow::Result<RelayConfig> {
    let path = std::env::var("RELAY_CONFIG").unwrap_or_else(|_| "config/relay.toml".into());
    let cfg = match tokio::fs::read_to_string(&path).await {
        Ok(text) => {
            tracing::info!(%path, "loaded relay config");
            RelayConfig::from_toml_str(&text)?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(%path, "config file not found, using defaults");
            RelayConfig::default()
        }
        Err(e) => return Err(e.into()),
    };
    Ok(cfg.apply_env_overrides(|k| std::env::var(k).ok()))
}

/// Reads the upstream credential once. Blank values count as missing.
pub fn api_key_from_env() -> Option<String> {
    std::env::var(API_KEY_ENV)
        .ok()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}
