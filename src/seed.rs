//! Access to seed data files shipped alongside the service.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::config::ConfigProvider;
use crate::error::Result;

/// Opens files relative to the configured `seed_path` directory.
#[derive(Debug, Clone)]
pub struct SeedReader {
    seed_path: PathBuf,
}

impl SeedReader {
    pub fn new(seed_path: impl Into<PathBuf>) -> Self {
        Self {
            seed_path: seed_path.into(),
        }
    }

    /// Fails with `ConfigurationMissing` when `seed_path` is not set.
    pub fn from_provider(provider: &ConfigProvider) -> Result<Self> {
        Ok(Self::new(provider.seed_path()?))
    }

    pub fn seed_path(&self) -> &Path {
        &self.seed_path
    }

    pub fn open(&self, file_name: &str) -> Result<File> {
        let path = self.seed_path.join(file_name);
        File::open(&path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to open seed file");
            e.into()
        })
    }

    /// Open `file_name` and deserialize it as JSON.
    pub fn read_json<T: DeserializeOwned>(&self, file_name: &str) -> Result<T> {
        let file = self.open(file_name)?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            tracing::error!(file = %file_name, error = %e, "Failed to parse seed file");
            e.into()
        })
    }
}
