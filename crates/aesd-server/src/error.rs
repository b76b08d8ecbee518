use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] aesd_store::StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("line exceeds {limit} bytes without a newline")]
    LineTooLong { limit: usize },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("cannot spawn thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("access lock poisoned")]
    LockPoisoned,

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;
