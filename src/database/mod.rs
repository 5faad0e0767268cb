//! PostgreSQL bootstrapping.
//!
//! Builds DSNs from configuration and opens one logical [`Database`]. In a
//! hosted deployment the handle routes writes to source hosts and reads to
//! replica hosts using a [`LoadBalancePolicy`] (uniform random by default).

mod dsn;
mod pool;
mod resolver;

pub use dsn::{build_dsn, dsn_for_host, mask_dsn};
pub use pool::{Database, Endpoint};
pub use resolver::{LoadBalancePolicy, Operation, RandomPolicy, Resolver};

use thiserror::Error;

use crate::config::{ConfigProvider, DatabaseConfig};
use crate::error::Result;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Load the database configuration and connect.
///
/// `Err` means a replicated deployment could not reach its master and the
/// service must not start. `Ok(None)` means a single-host connection failed;
/// the failure has already been logged.
pub async fn init_database(provider: &ConfigProvider) -> Result<Option<Database>> {
    let config = DatabaseConfig::load(provider)?;
    let service_name = provider.service_name()?;

    Ok(Database::connect(&config, &service_name).await?)
}
