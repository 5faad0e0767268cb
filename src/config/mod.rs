mod credentials;
mod database;
mod settings;

pub use credentials::{CredentialStore, CredentialWatcher, DbCredentials, DEFAULT_CREDENTIAL_PATHS};
pub use database::{DatabaseConfig, HostTopology, PoolOptions};
pub use settings::{
    AuthConfig, ClientAuthConfig, ConfigProvider, DeployEnv, HttpConfig, JwksConfig, LogFormat,
    LoggingConfig, OtelConfig, RequestLogConfig,
};

#[cfg(test)]
pub(crate) use settings::tests::provider_from_yaml;
