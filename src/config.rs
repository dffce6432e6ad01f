use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default config file name (extension resolved by the `config` crate)
pub const DEFAULT_CONFIG_NAME: &str = "log-sage";

/// Environment variable prefix, e.g. `LOG_SAGE__PROVIDER__API_KEY`
pub const ENV_PREFIX: &str = "LOG_SAGE";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub throttle: ThrottleConfig,
    pub prompt: PromptConfig,
    pub notify: NotifyConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8088,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Remote text-generation provider (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Bearer credential. Blank means analysis is disabled.
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// End-to-end deadline for one analysis call
    pub timeout_seconds: u64,
    pub max_response_bytes: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 1200,
            timeout_seconds: 90,
            max_response_bytes: 1024 * 1024,
        }
    }
}

impl ProviderConfig {
    pub fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Cooling-off window per failure site
    pub window_seconds: u64,
    pub max_entries: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_seconds: 600,
            max_entries: 1000,
        }
    }
}

impl ThrottleConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PromptConfig {
    pub max_source_bytes: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: 20_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "/metrics".to_string(),
        }
    }
}

/// Load configuration: defaults, then the config file (optional), then
/// `LOG_SAGE__*` environment variables.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let file_source = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
    };

    let config = config::Config::builder()
        .add_source(file_source)
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        anyhow::bail!("server.port must be non-zero");
    }

    if !is_http_url(&cfg.provider.base_url) {
        anyhow::bail!(
            "provider.base_url must be an http(s) URL, got '{}'",
            cfg.provider.base_url
        );
    }

    if cfg.provider.model.trim().is_empty() {
        anyhow::bail!("provider.model cannot be empty");
    }

    if !(0.0..=2.0).contains(&cfg.provider.temperature) {
        anyhow::bail!(
            "provider.temperature must be between 0.0 and 2.0, got {}",
            cfg.provider.temperature
        );
    }

    if cfg.provider.max_tokens == 0 {
        anyhow::bail!("provider.max_tokens must be greater than 0");
    }

    if cfg.provider.timeout_seconds == 0 {
        anyhow::bail!("provider.timeout_seconds must be greater than 0");
    }

    if cfg.throttle.window_seconds == 0 {
        anyhow::bail!("throttle.window_seconds must be greater than 0");
    }

    if cfg.throttle.max_entries == 0 {
        anyhow::bail!("throttle.max_entries must be greater than 0");
    }

    if cfg.prompt.max_source_bytes == 0 {
        anyhow::bail!("prompt.max_source_bytes must be greater than 0");
    }

    if let Some(url) = &cfg.notify.webhook_url {
        if !is_http_url(url) {
            anyhow::bail!("notify.webhook_url must be an http(s) URL, got '{}'", url);
        }
    }

    Ok(())
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}
