//! PostgreSQL connection handle with optional source/replica routing.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::Instrument;

use crate::config::{DatabaseConfig, HostTopology, PoolOptions};

use super::dsn::{dsn_for_host, mask_dsn};
use super::resolver::{LoadBalancePolicy, Operation, RandomPolicy, Resolver};
use super::DatabaseError;

/// A pool bound to one host.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub pool: PgPool,
}

/// One logical database: a primary pool plus optional routed endpoints.
///
/// Cheap to clone; clones share the underlying pools.
#[derive(Debug, Clone)]
pub struct Database {
    primary: PgPool,
    resolver: Option<Arc<Resolver<Endpoint>>>,
}

fn pool_options(options: &PoolOptions) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(options.max_connections)
        .acquire_timeout(Duration::from_secs(options.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(options.idle_timeout_seconds))
}

impl Database {
    /// Connect according to the configured topology.
    ///
    /// Single-host failures are logged and yield `Ok(None)`. Replicated
    /// failures are returned; callers should refuse to start serving.
    pub async fn connect(
        config: &DatabaseConfig,
        service_name: &str,
    ) -> Result<Option<Self>, DatabaseError> {
        match &config.hosts {
            HostTopology::Single { .. } => Ok(Self::connect_single(config, service_name).await),
            HostTopology::Replicated { .. } => {
                Self::connect_replicated(config, service_name, Arc::new(RandomPolicy))
                    .await
                    .map(Some)
            }
        }
    }

    pub async fn connect_single(config: &DatabaseConfig, service_name: &str) -> Option<Self> {
        let dsn = dsn_for_host(config, config.hosts.master(), service_name);

        match pool_options(&config.pool).connect(&dsn).await {
            Ok(pool) => {
                tracing::info!(
                    host = %config.hosts.master(),
                    pool_size = config.pool.max_connections,
                    "PostgreSQL connection pool created"
                );
                Some(Self::single(pool))
            }
            Err(e) => {
                tracing::error!(
                    dsn = %mask_dsn(&dsn),
                    error = %e,
                    "Error connecting to database"
                );
                None
            }
        }
    }

    pub async fn connect_replicated(
        config: &DatabaseConfig,
        service_name: &str,
        policy: Arc<dyn LoadBalancePolicy>,
    ) -> Result<Self, DatabaseError> {
        let (master, sources, replicas) = match &config.hosts {
            HostTopology::Replicated {
                master,
                sources,
                replicas,
            } => (master.as_str(), sources.as_slice(), replicas.as_slice()),
            HostTopology::Single { master } => (master.as_str(), &[][..], &[][..]),
        };

        let span = tracing::info_span!(
            "db.connect",
            service.name = %service_name,
            db.host = %master
        );
        let dsn = dsn_for_host(config, master, service_name);
        let primary = pool_options(&config.pool)
            .connect(&dsn)
            .instrument(span)
            .await
            .map_err(|e| {
                tracing::error!(dsn = %mask_dsn(&dsn), error = %e, "Error connecting to database");
                DatabaseError::Connect {
                    host: master.to_string(),
                    source: e,
                }
            })?;

        let sources = lazy_endpoints(config, sources, service_name)?;
        let replicas = lazy_endpoints(config, replicas, service_name)?;

        tracing::info!(
            master = %master,
            sources = ?sources.iter().map(|e| e.host.as_str()).collect::<Vec<_>>(),
            replicas = ?replicas.iter().map(|e| e.host.as_str()).collect::<Vec<_>>(),
            policy = ?policy,
            "PostgreSQL resolver configured"
        );

        Ok(Self {
            primary,
            resolver: Some(Arc::new(Resolver::with_policy(sources, replicas, policy))),
        })
    }

    /// Wrap an existing pool without routing.
    pub fn single(pool: PgPool) -> Self {
        Self {
            primary: pool,
            resolver: None,
        }
    }

    /// Wrap existing pools with routing.
    pub fn routed(primary: PgPool, resolver: Resolver<Endpoint>) -> Self {
        Self {
            primary,
            resolver: Some(Arc::new(resolver)),
        }
    }

    pub fn primary(&self) -> &PgPool {
        &self.primary
    }

    /// Pool for the given operation kind.
    pub fn route(&self, operation: Operation) -> &PgPool {
        self.resolver
            .as_ref()
            .and_then(|r| r.resolve(operation))
            .map(|endpoint| &endpoint.pool)
            .unwrap_or(&self.primary)
    }

    pub fn reader(&self) -> &PgPool {
        self.route(Operation::Read)
    }

    pub fn writer(&self) -> &PgPool {
        self.route(Operation::Write)
    }

    pub fn resolver(&self) -> Option<&Resolver<Endpoint>> {
        self.resolver.as_deref()
    }

    /// Close every pool gracefully.
    pub async fn close(&self) {
        if let Some(resolver) = &self.resolver {
            for endpoint in resolver.sources().iter().chain(resolver.replicas()) {
                endpoint.pool.close().await;
            }
        }
        self.primary.close().await;
        tracing::info!("PostgreSQL connection pools closed");
    }
}

fn lazy_endpoints(
    config: &DatabaseConfig,
    hosts: &[String],
    service_name: &str,
) -> Result<Vec<Endpoint>, DatabaseError> {
    hosts
        .iter()
        .map(|host| {
            let dsn = dsn_for_host(config, host, service_name);
            pool_options(&config.pool)
                .connect_lazy(&dsn)
                .map(|pool| Endpoint {
                    host: host.clone(),
                    pool,
                })
                .map_err(|e| DatabaseError::Connect {
                    host: host.clone(),
                    source: e,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbCredentials;

    fn config(hosts: HostTopology) -> DatabaseConfig {
        DatabaseConfig {
            driver: "postgres".to_string(),
            hosts,
            credentials: DbCredentials::new("u", "p"),
            db_name: "app".to_string(),
            port: "5432".to_string(),
            pool: PoolOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_lazy_endpoints_keep_host_order() {
        let cfg = config(HostTopology::Single {
            master: "m".to_string(),
        });
        let hosts = vec!["r1".to_string(), "r2".to_string()];
        let endpoints = lazy_endpoints(&cfg, &hosts, "svc").unwrap();

        let names: Vec<_> = endpoints.iter().map(|e| e.host.as_str()).collect();
        assert_eq!(names, vec!["r1", "r2"]);
    }

    #[tokio::test]
    async fn test_unparseable_dsn_is_an_error() {
        let mut cfg = config(HostTopology::Single {
            master: "m".to_string(),
        });
        cfg.port = "not-a-port".to_string();

        let err = lazy_endpoints(&cfg, &["r1".to_string()], "svc").unwrap_err();
        assert!(matches!(err, DatabaseError::Connect { ref host, .. } if host == "r1"));
    }

    #[tokio::test]
    async fn test_routing_without_resolver_uses_primary() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://u:p@localhost:5432/app")
            .unwrap();
        let db = Database::single(pool);

        assert!(db.resolver().is_none());
        // Same underlying pool for both roles
        assert_eq!(db.reader().size(), db.writer().size());
    }

    #[tokio::test]
    async fn test_single_host_failure_yields_none() {
        let mut cfg = config(HostTopology::Single {
            master: "127.0.0.1".to_string(),
        });
        // Nothing listens on port 1
        cfg.port = "1".to_string();
        cfg.pool.connect_timeout_seconds = 1;

        let db = Database::connect(&cfg, "svc").await.unwrap();
        assert!(db.is_none());
    }

    #[tokio::test]
    async fn test_replicated_failure_is_an_error() {
        let mut cfg = config(HostTopology::Replicated {
            master: "127.0.0.1".to_string(),
            sources: vec![],
            replicas: vec![],
        });
        cfg.port = "1".to_string();
        cfg.pool.connect_timeout_seconds = 1;

        let err = Database::connect(&cfg, "svc").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Connect { .. }));
    }
}
