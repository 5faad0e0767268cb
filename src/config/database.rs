use super::{ConfigProvider, CredentialStore, DbCredentials, DeployEnv};
use crate::error::Result;

/// Host layout of the database cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostTopology {
    /// One host serves reads and writes
    Single { master: String },
    /// Writes go to `sources`, reads to `replicas`. Empty lists are left
    /// empty; routing then falls back as described on
    /// [`crate::database::Resolver`].
    Replicated {
        master: String,
        sources: Vec<String>,
        replicas: Vec<String>,
    },
}

impl HostTopology {
    pub fn master(&self) -> &str {
        match self {
            HostTopology::Single { master } => master,
            HostTopology::Replicated { master, .. } => master,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connect_timeout_seconds: 5,
            idle_timeout_seconds: 600,
        }
    }
}

impl PoolOptions {
    fn load(provider: &ConfigProvider) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            max_connections: provider.u32_or("database.pool_size", defaults.max_connections)?,
            connect_timeout_seconds: provider.u64_or(
                "database.connect_timeout_seconds",
                defaults.connect_timeout_seconds,
            )?,
            idle_timeout_seconds: provider
                .u64_or("database.idle_timeout_seconds", defaults.idle_timeout_seconds)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub driver: String,
    pub hosts: HostTopology,
    pub credentials: DbCredentials,
    pub db_name: String,
    pub port: String,
    pub pool: PoolOptions,
}

impl DatabaseConfig {
    /// Resolve the database configuration.
    ///
    /// With `database.single_source` set, everything (credentials included)
    /// comes from flat secret-store keys. Otherwise hosts come from the
    /// `database.*` tree and credentials from the credential file.
    pub fn load(provider: &ConfigProvider) -> Result<Self> {
        if provider.bool_or("database.single_source", false)? {
            return Self::from_vault(provider);
        }

        let credentials = CredentialStore::discover(provider)?.load();
        Self::from_hosts(provider, credentials)
    }

    pub fn from_hosts(provider: &ConfigProvider, credentials: DbCredentials) -> Result<Self> {
        let hosts = match provider.deploy_env()? {
            DeployEnv::Hosted => HostTopology::Replicated {
                master: provider.require_string("database.hosts.master")?,
                sources: provider.string_list("database.hosts.sources")?,
                replicas: provider.string_list("database.hosts.replicas")?,
            },
            DeployEnv::Local => HostTopology::Single {
                master: provider.require_string("database.host")?,
            },
        };

        Ok(Self {
            driver: provider.require_string("database.driver")?,
            hosts,
            credentials,
            db_name: provider.require_string("database.dbname")?,
            port: provider.require_string("database.port")?,
            pool: PoolOptions::load(provider)?,
        })
    }

    pub fn from_vault(provider: &ConfigProvider) -> Result<Self> {
        let source = provider.require_string("DATABASE_SOURCE")?;

        let hosts = match provider.deploy_env()? {
            DeployEnv::Hosted => HostTopology::Replicated {
                master: source.clone(),
                sources: vec![source],
                replicas: provider
                    .optional_string("DATABASE_REPLICA")?
                    .into_iter()
                    .collect(),
            },
            DeployEnv::Local => HostTopology::Single { master: source },
        };

        Ok(Self {
            driver: provider.require_string("DATABASE_DRIVER")?,
            hosts,
            credentials: DbCredentials::new(
                provider.require_string("DB_USERNAME")?,
                provider.require_string("DB_PASSWORD")?,
            ),
            db_name: provider.require_string("DB_NAME")?,
            port: provider.require_string("DB_PORT")?,
            pool: PoolOptions::load(provider)?,
        })
    }
}
