use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

use aesd_store::{FileLog, LogBackend, LogDevice, DEFAULT_CAPACITY};

use crate::error::{ServerError, ServerResult};

pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_DATA_FILE: &str = "/var/tmp/aesdsocketdata";
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_MAX_LINE_LEN: usize = 1 << 20;
pub const DEFAULT_TIMESTAMP_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "timestamp: %Y/%m/%d %H:%M:%S";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Upper bound on bytes received or sent per socket call, and on bytes
    /// read from the store per lock acquisition while replying.
    pub chunk_size: usize,
    /// Bytes a connection may buffer while waiting for a newline. A client
    /// that exceeds it is disconnected.
    pub max_line_len: usize,
    pub backing: BackingConfig,
    pub timestamp: TimestampConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            backing: BackingConfig::default(),
            timestamp: TimestampConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> ServerResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> ServerResult<String> {
        toml::to_string_pretty(self).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn validate(&self) -> ServerResult<()> {
        if self.chunk_size == 0 {
            return Err(ServerError::Config("chunk_size must be non-zero".into()));
        }
        if self.max_line_len == 0 {
            return Err(ServerError::Config("max_line_len must be non-zero".into()));
        }
        if let BackingConfig::Ring { capacity: 0 } = self.backing {
            return Err(ServerError::Config("ring capacity must be non-zero".into()));
        }
        self.timestamp.validate()
    }
}

/// Which store the service writes to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackingConfig {
    /// Bounded in-process record ring.
    Ring {
        #[serde(default = "default_capacity")]
        capacity: usize,
    },
    /// Unbounded plain-file log.
    File {
        #[serde(default = "default_data_file")]
        path: PathBuf,
        #[serde(default = "default_true")]
        remove_on_exit: bool,
    },
}

impl Default for BackingConfig {
    fn default() -> Self {
        Self::File {
            path: default_data_file(),
            remove_on_exit: true,
        }
    }
}

impl BackingConfig {
    pub fn ring(capacity: usize) -> Self {
        Self::Ring { capacity }
    }

    pub fn file(path: impl Into<PathBuf>, remove_on_exit: bool) -> Self {
        Self::File {
            path: path.into(),
            remove_on_exit,
        }
    }

    /// Construct the configured backing store.
    pub fn open(&self) -> ServerResult<Box<dyn LogBackend>> {
        let backend: Box<dyn LogBackend> = match self {
            Self::Ring { capacity } => Box::new(LogDevice::new(*capacity)?),
            Self::File {
                path,
                remove_on_exit,
            } => Box::new(FileLog::open(path, *remove_on_exit)?),
        };
        Ok(backend)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampConfig {
    /// Only honoured by backings that accept timestamps (the file log).
    pub enabled: bool,
    pub interval_secs: u64,
    /// `strftime`-style format; a newline is appended to every stamp.
    pub format: String,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_TIMESTAMP_INTERVAL_SECS,
            format: DEFAULT_TIMESTAMP_FORMAT.into(),
        }
    }
}

impl TimestampConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> ServerResult<()> {
        if self.interval_secs == 0 {
            return Err(ServerError::Config("timestamp interval must be non-zero".into()));
        }
        if StrftimeItems::new(&self.format).any(|item| matches!(item, Item::Error)) {
            return Err(ServerError::Config(format!(
                "invalid timestamp format: {:?}",
                self.format
            )));
        }
        Ok(())
    }
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_data_file() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_FILE)
}

fn default_true() -> bool {
    true
}
