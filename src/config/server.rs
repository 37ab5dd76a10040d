use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::allocator::DEFAULT_MAX_ATTEMPTS;
use crate::error::{Error, Result};

pub const DEFAULT_PORT: u16 = 5932;
pub const CONFIG_FILE_NAME: &str = "buildindex.toml";
pub const DB_FILE_NAME: &str = "buildindex.db";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// How long a connection waits on another writer's lock before failing.
    pub busy_timeout_ms: u64,
    /// Retries of a conflicting allocation before it is reported as an error.
    pub max_allocation_attempts: u32,
}

/// Keys accepted in `<data_dir>/buildindex.toml`. All optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub busy_timeout_ms: Option<u64>,
    pub max_allocation_attempts: Option<u32>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

impl ServerConfig {
    /// Defaults, overlaid by the data directory's config file if present,
    /// overlaid by explicit command-line values.
    pub fn load(
        data_dir: impl Into<PathBuf>,
        host: Option<String>,
        port: Option<u16>,
    ) -> Result<Self> {
        let mut config = Self {
            data_dir: data_dir.into(),
            ..Self::default()
        };

        let path = config.config_path();
        if path.exists() {
            config.apply(FileConfig::read(&path)?);
        }

        if let Some(host) = host {
            config.host = host;
        }
        if let Some(port) = port {
            config.port = port;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, file: FileConfig) {
        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(ms) = file.busy_timeout_ms {
            self.busy_timeout_ms = ms;
        }
        if let Some(attempts) = file.max_allocation_attempts {
            self.max_allocation_attempts = attempts;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_allocation_attempts == 0 {
            return Err(Error::Config(
                "max_allocation_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("./data"),
            busy_timeout_ms: 5000,
            max_allocation_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}
