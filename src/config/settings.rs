use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};

use crate::error::{CommonError, Result};

/// Layered configuration source.
///
/// Precedence (lowest to highest): built-in defaults, `config.yaml`,
/// `config/{RUN_MODE}.yaml`, environment variables. Nested keys map to
/// environment variables with `__` as separator, so `database.hosts.master`
/// is `DATABASE__HOSTS__MASTER` and `ACCESS_SECRET` stays `ACCESS_SECRET`.
#[derive(Debug, Clone)]
pub struct ConfigProvider {
    config: Config,
}

fn env_source() -> Environment {
    Environment::default()
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("database.hosts.sources")
        .with_list_parse_key("database.hosts.replicas")
        .with_list_parse_key("request_log.skip_paths")
}

fn normalize(key: &str) -> String {
    key.to_ascii_lowercase()
}

impl ConfigProvider {
    pub fn load() -> Result<Self> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .set_default("env", "local")?
            .set_default("log.level", "info")?
            .set_default("log.format", "json")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .add_source(File::with_name("config").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(env_source())
            .build()?;

        tracing::info!(run_mode = %run_mode, "Configuration loaded");

        Ok(Self { config })
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Fetch a required string. Absent and blank values are both reported
    /// as [`CommonError::ConfigurationMissing`].
    pub fn require_string(&self, key: &str) -> Result<String> {
        match self.config.get_string(&normalize(key)) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            Ok(_) | Err(ConfigError::NotFound(_)) => Err(CommonError::missing(key)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn optional_string(&self, key: &str) -> Result<Option<String>> {
        match self.require_string(key) {
            Ok(value) => Ok(Some(value)),
            Err(CommonError::ConfigurationMissing { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn string_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .optional_string(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.config.get_bool(&normalize(key)) {
            Ok(value) => Ok(value),
            Err(ConfigError::NotFound(_)) => Ok(default),
            Err(e) => Err(e.into()),
        }
    }

    pub fn u64_or(&self, key: &str, default: u64) -> Result<u64> {
        match self.config.get_int(&normalize(key)) {
            Ok(value) => u64::try_from(value).map_err(|_| {
                CommonError::Config(ConfigError::Message(format!(
                    "`{key}` must be a non-negative integer, got {value}"
                )))
            }),
            Err(ConfigError::NotFound(_)) => Ok(default),
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`Self::u64_or`], rejecting values that do not fit in a `u32`.
    pub fn u32_or(&self, key: &str, default: u32) -> Result<u32> {
        let value = self.u64_or(key, u64::from(default))?;
        u32::try_from(value).map_err(|_| {
            CommonError::Config(ConfigError::Message(format!(
                "`{key}` out of range: {value}"
            )))
        })
    }

    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.config.get_float(&normalize(key)) {
            Ok(value) => Ok(value),
            Err(ConfigError::NotFound(_)) => Ok(default),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a list of strings. A missing key yields an empty list; a plain
    /// string is split on commas.
    pub fn string_list(&self, key: &str) -> Result<Vec<String>> {
        let key = normalize(key);
        match self.config.get_array(&key) {
            Ok(values) => values
                .into_iter()
                .map(|v| v.into_string().map_err(CommonError::from))
                .filter(|v| !matches!(v, Ok(s) if s.trim().is_empty()))
                .collect(),
            Err(ConfigError::NotFound(_)) => Ok(Vec::new()),
            Err(ConfigError::Type { .. }) => Ok(self
                .config
                .get_string(&key)?
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn deploy_env(&self) -> Result<DeployEnv> {
        Ok(DeployEnv::parse(&self.string_or("env", "local")?))
    }

    /// Service name used for DSN attribution and telemetry.
    pub fn service_name(&self) -> Result<String> {
        self.require_string("service.name")
    }

    pub fn seed_path(&self) -> Result<String> {
        self.require_string("seed_path")
    }
}

/// Deployment flavour. `hosted` enables source/replica routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployEnv {
    Local,
    Hosted,
}

impl DeployEnv {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("hosted") {
            DeployEnv::Hosted
        } else {
            DeployEnv::Local
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub access_secret: String,
    pub refresh_secret: String,
}

impl AuthConfig {
    pub fn load(provider: &ConfigProvider) -> Result<Self> {
        Ok(Self {
            access_secret: provider.require_string("ACCESS_SECRET")?,
            refresh_secret: provider.require_string("REFRESH_SECRET")?,
        })
    }
}

/// Settings for JWKS-based token verification.
#[derive(Debug, Clone)]
pub struct JwksConfig {
    pub url: String,
    /// How long a resolved key stays cached
    pub cache_ttl: Duration,
    /// How long an unknown `kid` is remembered as missing
    pub negative_ttl: Duration,
    /// Per-request timeout for the JWKS fetch
    pub timeout: Duration,
    /// Retries after the first failed fetch
    pub max_retries: u32,
}

fn default_jwks_cache_ttl() -> u64 {
    300 // 5 minutes
}

fn default_jwks_negative_ttl() -> u64 {
    30
}

fn default_jwks_timeout_ms() -> u64 {
    5000
}

fn default_jwks_max_retries() -> u32 {
    2
}

impl JwksConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cache_ttl: Duration::from_secs(default_jwks_cache_ttl()),
            negative_ttl: Duration::from_secs(default_jwks_negative_ttl()),
            timeout: Duration::from_millis(default_jwks_timeout_ms()),
            max_retries: default_jwks_max_retries(),
        }
    }

    /// `None` when `auth.jwks_url` is not configured.
    pub fn load(provider: &ConfigProvider) -> Result<Option<Self>> {
        let Some(url) = provider.optional_string("auth.jwks_url")? else {
            return Ok(None);
        };

        Ok(Some(Self {
            url,
            cache_ttl: Duration::from_secs(
                provider.u64_or("auth.jwks_cache_ttl_seconds", default_jwks_cache_ttl())?,
            ),
            negative_ttl: Duration::from_secs(
                provider.u64_or("auth.jwks_negative_ttl_seconds", default_jwks_negative_ttl())?,
            ),
            timeout: Duration::from_millis(
                provider.u64_or("auth.jwks_timeout_ms", default_jwks_timeout_ms())?,
            ),
            max_retries: provider.u32_or("auth.jwks_max_retries", default_jwks_max_retries())?,
        }))
    }
}

/// Static key pair checked by the client gate.
#[derive(Clone)]
pub struct ClientAuthConfig {
    pub key: String,
    pub secret: String,
}

impl ClientAuthConfig {
    pub fn load(provider: &ConfigProvider) -> Result<Self> {
        Ok(Self {
            key: provider.require_string("client.auth_key")?,
            secret: provider.require_string("client.auth_secret")?,
        })
    }
}

impl std::fmt::Debug for ClientAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAuthConfig")
            .field("key", &self.key)
            .field("secret", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl HttpConfig {
    pub fn load(provider: &ConfigProvider) -> Result<Self> {
        let port = provider.u64_or("server.port", u64::from(default_port()))?;
        let port = u16::try_from(port).map_err(|_| {
            CommonError::Config(ConfigError::Message(format!(
                "`server.port` out of range: {port}"
            )))
        })?;

        Ok(Self {
            host: provider.string_or("server.host", &default_host())?,
            port,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Fallback filter directive when `RUST_LOG` is not set
    pub level: String,
    pub format: LogFormat,
    pub service_name: String,
    pub otel: OtelConfig,
}

#[derive(Debug, Clone)]
pub struct OtelConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub sampling_ratio: f64,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:4317".to_string(),
            sampling_ratio: 1.0,
        }
    }
}

impl LoggingConfig {
    pub fn load(provider: &ConfigProvider) -> Result<Self> {
        let format = match provider.string_or("log.format", "json")?.as_str() {
            "pretty" | "text" | "plain" => LogFormat::Pretty,
            _ => LogFormat::Json,
        };
        let defaults = OtelConfig::default();

        Ok(Self {
            level: provider.string_or("log.level", "info")?,
            format,
            service_name: provider.service_name()?,
            otel: OtelConfig {
                enabled: provider.bool_or("otel.enabled", defaults.enabled)?,
                endpoint: provider.string_or("otel.endpoint", &defaults.endpoint)?,
                sampling_ratio: provider.f64_or("otel.sampling_ratio", defaults.sampling_ratio)?,
            },
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            service_name: env!("CARGO_PKG_NAME").to_string(),
            otel: OtelConfig::default(),
        }
    }
}

/// Options for the request/response body logging middleware.
#[derive(Debug, Clone)]
pub struct RequestLogConfig {
    pub skip_paths: Vec<String>,
    /// Report the `time` field in UTC instead of local time
    pub utc: bool,
    /// chrono format string; the `time` field is omitted when unset
    pub time_format: Option<String>,
    /// Largest body buffered for logging; bigger or unsized bodies log `null`
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> u32 {
    64 * 1024
}

impl Default for RequestLogConfig {
    fn default() -> Self {
        Self {
            skip_paths: Vec::new(),
            utc: false,
            time_format: None,
            max_body_bytes: default_max_body_bytes() as usize,
        }
    }
}

impl RequestLogConfig {
    pub fn load(provider: &ConfigProvider) -> Result<Self> {
        Ok(Self {
            skip_paths: provider.string_list("request_log.skip_paths")?,
            utc: provider.bool_or("request_log.utc", false)?,
            time_format: provider.optional_string("request_log.time_format")?,
            max_body_bytes: provider
                .u32_or("request_log.max_body_bytes", default_max_body_bytes())?
                as usize,
        })
    }
}
