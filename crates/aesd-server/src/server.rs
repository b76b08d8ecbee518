use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::ConnectionHandler;
use crate::registry::ThreadRegistry;
use crate::serializer::AccessSerializer;
use crate::shutdown::ShutdownSignal;
use crate::timestamp::TimestampInjector;

/// State shared by the accept loop, every handler, and the timestamp
/// writer. One per server; built in [`LogServer::bind`] and torn down when
/// [`LogServer::run`] returns.
#[derive(Clone, Debug)]
pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub serializer: Arc<AccessSerializer>,
    pub shutdown: Arc<ShutdownSignal>,
}

/// Counters reported once the server has stopped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub connections: u64,
    pub drained: usize,
    pub timestamps: u64,
}

/// Requests shutdown from any thread.
///
/// Sets the shared flag, then connects to the listener once so a blocked
/// `accept` returns and notices the flag.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    signal: Arc<ShutdownSignal>,
    wake_addr: SocketAddr,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if !self.signal.trigger() {
            return;
        }
        info!("shutdown requested");
        if let Err(e) = TcpStream::connect_timeout(&self.wake_addr, Duration::from_secs(1)) {
            warn!(addr = %self.wake_addr, error = %e, "could not wake accept loop");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.signal.is_triggered()
    }
}

/// Thread-per-connection line log service.
pub struct LogServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    context: ServerContext,
}

impl LogServer {
    /// Validate the configuration, open the backing store, and bind the
    /// listener. Every failure here is fatal to startup.
    pub fn bind(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let backend = config.backing.open()?;
        let listener = TcpListener::bind(config.bind_addr).map_err(|source| ServerError::Bind {
            addr: config.bind_addr,
            source,
        })?;
        let local_addr = listener.local_addr()?;

        let shutdown = Arc::new(ShutdownSignal::new());
        info!(addr = %local_addr, backing = backend.kind(), "aesd server listening");
        let serializer = Arc::new(AccessSerializer::new(backend, Arc::clone(&shutdown)));
        Ok(Self {
            listener,
            local_addr,
            context: ServerContext {
                config: Arc::new(config),
                serializer,
                shutdown,
            },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            signal: Arc::clone(&self.context.shutdown),
            wake_addr: wake_addr(self.local_addr),
        }
    }

    /// Accept connections until shutdown, then drain handlers, stop the
    /// timestamp writer, and tear the backing store down.
    pub fn run(self) -> ServerResult<RunSummary> {
        let Self {
            listener, context, ..
        } = self;

        let injector = start_injector(&context);
        let mut registry = ThreadRegistry::new();

        for incoming in listener.incoming() {
            if context.shutdown.is_triggered() {
                break;
            }
            match incoming {
                Ok(stream) => dispatch(&context, &mut registry, stream),
                Err(e) => warn!(error = %e, "accept failed"),
            }
            registry.reap_completed();
        }
        drop(listener);
        info!("listener closed; draining");

        let drained = registry.drain();
        let timestamps = injector.map(TimestampInjector::join).unwrap_or(0);
        context.serializer.teardown()?;

        let summary = RunSummary {
            connections: registry.spawned(),
            drained,
            timestamps,
        };
        info!(?summary, "aesd server stopped");
        Ok(summary)
    }
}

fn start_injector(context: &ServerContext) -> Option<TimestampInjector> {
    let settings = &context.config.timestamp;
    if !settings.enabled {
        return None;
    }
    match context.serializer.acquire() {
        Ok(store) if store.accepts_timestamps() => {}
        Ok(store) => {
            debug!(backing = store.kind(), "timestamps not used with this backing");
            return None;
        }
        Err(e) => {
            warn!(error = %e, "cannot inspect backing; timestamps disabled");
            return None;
        }
    }
    match TimestampInjector::spawn(Arc::clone(&context.serializer), settings) {
        Ok(injector) => Some(injector),
        Err(e) => {
            error!(error = %e, "timestamp writer not started");
            None
        }
    }
}

fn dispatch(context: &ServerContext, registry: &mut ThreadRegistry, stream: TcpStream) {
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(e) => {
            warn!(error = %e, "dropping connection without peer address");
            return;
        }
    };
    let control = match stream.try_clone() {
        Ok(control) => Some(control),
        Err(e) => {
            warn!(%peer, error = %e, "no control handle; connection cannot be unblocked at drain");
            None
        }
    };

    let serializer = Arc::clone(&context.serializer);
    let chunk_size = context.config.chunk_size;
    let max_line_len = context.config.max_line_len;
    let spawned = registry.spawn(peer, control, move |id| {
        ConnectionHandler::new(id, peer, stream, serializer, chunk_size)
            .with_max_line_len(max_line_len)
            .run();
    });
    if let Err(e) = spawned {
        error!(%peer, error = %e, "cannot spawn connection handler");
    }
}

/// Address a local client can use to reach a listener bound to `addr`.
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}
