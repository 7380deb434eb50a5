use std::{str::FromStr, time::Duration};

use crate::interpret::DuplicatePolicy;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_TARGET_DIMENSION: u32 = 384;
pub const DEFAULT_TARGET_QUALITY: u8 = 50;
pub const DEFAULT_DEPLOYMENT: &str = "gpt-4o";
pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_PORT: u16 = 8080;

/// Connection settings for the hosted chat-completion deployment.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub deployment: String,
    pub api_version: String,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ModelConfig {
    /// Endpoint and key, only when both are present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.endpoint.as_deref(), self.api_key.as_deref()) {
            (Some(endpoint), Some(key)) if !endpoint.is_empty() && !key.is_empty() => Some((endpoint, key)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub model: ModelConfig,
    pub max_upload_bytes: usize,
    pub target_dimension: u32,
    pub target_quality: u8,
    pub duplicate_policy: DuplicatePolicy,
    pub production: bool,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig {
                endpoint: None,
                api_key: None,
                deployment: DEFAULT_DEPLOYMENT.to_string(),
                api_version: DEFAULT_API_VERSION.to_string(),
                timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
                temperature: DEFAULT_TEMPERATURE,
                max_tokens: DEFAULT_MAX_TOKENS,
            },
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            target_dimension: DEFAULT_TARGET_DIMENSION,
            target_quality: DEFAULT_TARGET_QUALITY,
            duplicate_policy: DuplicatePolicy::KeepFirst,
            production: false,
            port: DEFAULT_PORT,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let model = ModelConfig {
            endpoint: lookup("AZURE_OPENAI_ENDPOINT")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty()),
            api_key: lookup("AZURE_OPENAI_API_KEY").filter(|v| !v.trim().is_empty()),
            deployment: lookup("AZURE_OPENAI_DEPLOYMENT").unwrap_or(defaults.model.deployment),
            api_version: lookup("AZURE_OPENAI_API_VERSION").unwrap_or(defaults.model.api_version),
            timeout: parse_var(&lookup, "MODEL_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.model.timeout),
            temperature: parse_var(&lookup, "MODEL_TEMPERATURE").unwrap_or(defaults.model.temperature),
            max_tokens: parse_var(&lookup, "MODEL_MAX_TOKENS").unwrap_or(defaults.model.max_tokens),
        };

        Self {
            model,
            max_upload_bytes: parse_var(&lookup, "MAX_UPLOAD_BYTES").unwrap_or(defaults.max_upload_bytes),
            target_dimension: parse_var(&lookup, "TARGET_IMAGE_DIMENSION")
                .filter(|d: &u32| *d > 0)
                .unwrap_or(defaults.target_dimension),
            target_quality: parse_var(&lookup, "TARGET_IMAGE_QUALITY")
                .filter(|q: &u8| (1..=100).contains(q))
                .unwrap_or(defaults.target_quality),
            duplicate_policy: lookup("DUPLICATE_ITEM_POLICY")
                .and_then(|v| DuplicatePolicy::from_name(&v))
                .unwrap_or(defaults.duplicate_policy),
            production: lookup("APP_ENV")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(false),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}
