//! TCP front end for the aesd log store.
//!
//! One OS thread per accepted connection, one background timestamp
//! writer, and the accept loop. Every read and write of the backing store
//! is serialized through a single [`AccessSerializer`].
//!
//! Shutdown is cooperative: [`ShutdownHandle::shutdown`] sets the shared
//! flag and wakes the accept loop, which then drains the
//! [`ThreadRegistry`], joins the [`TimestampInjector`], and tears the store
//! down.

pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod serializer;
pub mod server;
pub mod shutdown;
pub mod timestamp;

pub use config::{BackingConfig, ServerConfig, TimestampConfig};
pub use error::{ServerError, ServerResult};
pub use handler::{ConnectionHandler, Outcome};
pub use protocol::{Request, SEEK_COMMAND_PREFIX};
pub use registry::{ConnectionId, ThreadRegistry};
pub use serializer::AccessSerializer;
pub use server::{LogServer, RunSummary, ServerContext, ShutdownHandle};
pub use shutdown::{termination_signal, ShutdownSignal, SignalKind};
pub use timestamp::TimestampInjector;
