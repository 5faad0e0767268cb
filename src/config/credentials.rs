//! Database credentials from the secret store.
//!
//! The secret store drops an env-formatted file (`db_username=...`,
//! `db_password=...`) at a well-known path. [`CredentialWatcher`] polls the
//! file and publishes rotated credentials, but never rebinds pools that are
//! already open: rotation takes effect for new connections only after the
//! consumer reconnects or the process restarts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::ConfigProvider;
use crate::error::{CommonError, Result};

/// Search order for the credential file when no override is configured
pub const DEFAULT_CREDENTIAL_PATHS: &[&str] = &[
    "/vault/secrets/db",
    "/vault/secrets/db.env",
    "./db",
    "./db.env",
];

#[derive(Clone, Default, PartialEq, Eq)]
pub struct DbCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl DbCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse an env-formatted credential file. Key matching ignores case.
    pub fn from_env_file(path: &Path) -> Result<Self> {
        let iter = dotenvy::from_path_iter(path).map_err(|e| dotenv_error(path, e))?;

        let mut credentials = DbCredentials::default();
        for item in iter {
            let (key, value) = item.map_err(|e| dotenv_error(path, e))?;
            match key.to_ascii_lowercase().as_str() {
                "db_username" => credentials.username = value,
                "db_password" => credentials.password = value,
                _ => {}
            }
        }

        Ok(credentials)
    }
}

fn dotenv_error(path: &Path, err: dotenvy::Error) -> CommonError {
    match err {
        dotenvy::Error::Io(e) => CommonError::Io(e),
        other => CommonError::Config(config::ConfigError::Message(format!(
            "invalid credential file {}: {}",
            path.display(),
            other
        ))),
    }
}

/// Locates and reads the credential file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: Option<PathBuf>,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Use `database.credentials_file` when set, otherwise the first existing
    /// entry of [`DEFAULT_CREDENTIAL_PATHS`].
    pub fn discover(provider: &ConfigProvider) -> Result<Self> {
        if let Some(path) = provider.optional_string("database.credentials_file")? {
            return Ok(Self::new(path));
        }

        let path = DEFAULT_CREDENTIAL_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file());

        Ok(Self { path })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the current credentials. A missing or unreadable file is logged
    /// and yields empty credentials so trust-authenticated local databases
    /// keep working.
    pub fn load(&self) -> DbCredentials {
        let Some(path) = &self.path else {
            tracing::error!(
                searched = ?DEFAULT_CREDENTIAL_PATHS,
                "Database credential file not found"
            );
            return DbCredentials::default();
        };

        match DbCredentials::from_env_file(path) {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to read database credentials");
                DbCredentials::default()
            }
        }
    }

    /// Start polling the credential file. Returns `None` when no file was
    /// located.
    pub fn watch(
        &self,
        poll_interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Option<CredentialWatcher> {
        let path = self.path.clone()?;
        Some(CredentialWatcher::spawn(path, self.load(), poll_interval, shutdown))
    }
}

/// Background task that reports credential rotation.
pub struct CredentialWatcher {
    receiver: watch::Receiver<DbCredentials>,
    handle: JoinHandle<()>,
}

impl CredentialWatcher {
    fn spawn(
        path: PathBuf,
        initial: DbCredentials,
        poll_interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let (sender, receiver) = watch::channel(initial);
        let mut last_modified = modified_at(&path);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            // Skip immediate first tick
            ticker.tick().await;

            tracing::info!(path = %path.display(), "Watching database credential file");

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("Credential watcher received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let modified = modified_at(&path);
                        if modified == last_modified {
                            continue;
                        }
                        last_modified = modified;

                        tracing::info!(path = %path.display(), "Database config changed");

                        match DbCredentials::from_env_file(&path) {
                            Ok(credentials) => {
                                sender.send_if_modified(|current| {
                                    if *current == credentials {
                                        false
                                    } else {
                                        *current = credentials;
                                        true
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::warn!(path = %path.display(), error = %e, "Failed to reload database credentials");
                            }
                        }
                    }
                }
            }
        });

        Self { receiver, handle }
    }

    /// Receiver that observes each distinct credential set.
    pub fn subscribe(&self) -> watch::Receiver<DbCredentials> {
        self.receiver.clone()
    }

    pub fn current(&self) -> DbCredentials {
        self.receiver.borrow().clone()
    }

    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_creds(file: &mut tempfile::NamedTempFile, user: &str, pass: &str) {
        let f = file.as_file_mut();
        f.set_len(0).unwrap();
        use std::io::Seek;
        f.seek(std::io::SeekFrom::Start(0)).unwrap();
        writeln!(f, "db_username={}", user).unwrap();
        writeln!(f, "DB_PASSWORD={}", pass).unwrap();
        f.flush().unwrap();
    }

    #[test]
    fn test_parse_env_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_creds(&mut file, "svc_user", "s3cret");

        let creds = DbCredentials::from_env_file(file.path()).unwrap();
        assert_eq!(creds, DbCredentials::new("svc_user", "s3cret"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = DbCredentials::new("u", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("u"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_missing_file_yields_empty_credentials() {
        let store = CredentialStore::new("/definitely/not/here/db");
        assert_eq!(store.load(), DbCredentials::default());

        let store = CredentialStore { path: None };
        assert_eq!(store.load(), DbCredentials::default());
    }

    #[tokio::test]
    async fn test_watcher_publishes_rotation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_creds(&mut file, "old", "old-pass");

        let store = CredentialStore::new(file.path());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let watcher = store
            .watch(Duration::from_millis(20), shutdown_rx)
            .unwrap();
        let mut rx = watcher.subscribe();
        assert_eq!(watcher.current().username, "old");

        write_creds(&mut file, "new", "new-pass");
        // Force a visible mtime change regardless of filesystem granularity
        file.as_file()
            .set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.borrow().username, "new");

        let _ = shutdown_tx.send(());
        watcher.stop().await;
    }
}
