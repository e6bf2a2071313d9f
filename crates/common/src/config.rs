//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Redis configuration (delivery queue backend).
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Federation configuration.
    #[serde(default)]
    pub federation: FederationConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Public URL of this instance.
    pub url: String,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Federation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Whether federation is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Overrides the generated `User-Agent`.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Remote fetch defaults.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Per-host rate limiting of proactive fetches.
    #[serde(default)]
    pub rate_limit: HostRateLimitConfig,
    /// Remote like/reaction synchronisation.
    #[serde(default)]
    pub likes: LikesConfig,
}

/// Remote fetch defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
}

/// Per-host rate limiting settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HostRateLimitConfig {
    /// Minimum spacing between two requests to the same host.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Consecutive failures before a host enters cooldown.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_base_cooldown_ms")]
    pub base_cooldown_ms: u64,
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
}

/// Remote like synchronisation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LikesConfig {
    /// Collection pages fetched per synchronisation, the collection itself included.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Collection items processed per synchronisation.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Fall back to the Misskey reactions API when no collection is advertised.
    #[serde(default = "default_true")]
    pub misskey_fallback: bool,
}

fn default_redis_prefix() -> String {
    "fedigate".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_timeout_ms() -> u64 {
    10_000
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_retry_delay_ms() -> u64 {
    1_000
}

const fn default_min_interval_ms() -> u64 {
    1_000
}

const fn default_max_failures() -> u32 {
    5
}

const fn default_base_cooldown_ms() -> u64 {
    5_000
}

const fn default_max_cooldown_ms() -> u64 {
    60_000
}

const fn default_max_pages() -> usize {
    2
}

const fn default_max_items() -> usize {
    100
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user_agent: None,
            fetch: FetchConfig::default(),
            rate_limit: HostRateLimitConfig::default(),
            likes: LikesConfig::default(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
        }
    }
}

impl FetchConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub const fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }
}

impl Default for HostRateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            max_failures: default_max_failures(),
            base_cooldown_ms: default_base_cooldown_ms(),
            max_cooldown_ms: default_max_cooldown_ms(),
        }
    }
}

impl Default for LikesConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_items: default_max_items(),
            misskey_fallback: true,
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `FEDIGATE_ENV`)
    /// 3. Environment variables with `FEDIGATE__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("FEDIGATE_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("FEDIGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("FEDIGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// The `User-Agent` sent with every outbound federation request.
    #[must_use]
    pub fn user_agent(&self) -> String {
        self.federation.user_agent.clone().unwrap_or_else(|| {
            format!(
                "fedigate/{} (+{})",
                env!("CARGO_PKG_VERSION"),
                self.server.url.trim_end_matches('/')
            )
        })
    }
}
