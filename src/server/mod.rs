use std::fmt;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::config::{self, AppConfig};
use crate::logging::{LogLevel, Logger};
use crate::pools::{ConnectionRegistry, RegistryError};
use crate::queues::QueueRepository;
use crate::security::AccessControl;
use crate::shutdown::ShutdownSignal;
use crate::wire::codec::WireCodec;
use crate::wire::session::runtime;

const ACCEPT_IDLE_SLEEP: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub enum ServerError {
    Bind {
        address: String,
        source: io::Error,
    },
    SetNonBlocking {
        source: io::Error,
    },
    ConfigureAcceptedStream {
        source: io::Error,
    },
    StreamClone {
        source: io::Error,
    },
    Accept {
        source: io::Error,
    },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { address, source } => {
                write!(f, "failed to bind TCP server on {address}: {source}")
            }
            Self::SetNonBlocking { source } => {
                write!(f, "failed to set TCP server to non-blocking mode: {source}")
            }
            Self::ConfigureAcceptedStream { source } => {
                write!(f, "failed to configure accepted TCP stream: {source}")
            }
            Self::StreamClone { source } => {
                write!(f, "failed to clone accepted TCP stream for full duplex IO: {source}")
            }
            Self::Accept { source } => write!(f, "failed to accept TCP connection: {source}"),
        }
    }
}

impl std::error::Error for ServerError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkAddress {
    pub host: String,
    pub port: u16,
}

impl From<SocketAddr> for NetworkAddress {
    fn from(value: SocketAddr) -> Self {
        Self {
            host: value.ip().to_string(),
            port: value.port(),
        }
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An accepted client socket. The session handler owns the read side through
/// [`Connection::reader`]; responses go through the shared writer.
pub struct Connection {
    id: Uuid,
    address: NetworkAddress,
    connected_at: DateTime<Utc>,
    open: AtomicBool,
    stream: TcpStream,
    writer: Mutex<TcpStream>,
}

impl Connection {
    fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        read_poll_interval: Duration,
    ) -> Result<Self, ServerError> {
        stream
            .set_nonblocking(false)
            .map_err(|source| ServerError::ConfigureAcceptedStream { source })?;
        stream
            .set_nodelay(true)
            .map_err(|source| ServerError::ConfigureAcceptedStream { source })?;
        stream
            .set_read_timeout(Some(read_poll_interval.max(Duration::from_millis(1))))
            .map_err(|source| ServerError::ConfigureAcceptedStream { source })?;

        let writer = stream
            .try_clone()
            .map_err(|source| ServerError::StreamClone { source })?;

        Ok(Self {
            id: Uuid::new_v4(),
            address: NetworkAddress::from(peer_addr),
            connected_at: Utc::now(),
            open: AtomicBool::new(true),
            stream,
            writer: Mutex::new(writer),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> &NetworkAddress {
        &self.address
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Independent handle on the read side. Reads time out after the poll
    /// interval configured at accept.
    pub fn reader(&self) -> io::Result<TcpStream> {
        self.stream.try_clone()
    }

    pub fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().expect("connection writer lock poisoned");
        writer.write_all(frame)?;
        writer.flush()
    }

    /// Flags the connection for teardown. The handler notices within one read
    /// poll tick and closes the socket itself, so a response already being
    /// written still reaches the peer.
    pub fn request_close(&self) -> bool {
        self.open.swap(false, Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("open", &self.is_open())
            .finish()
    }
}

pub struct TcpServer {
    listener: TcpListener,
    read_poll_interval: Duration,
}

impl TcpServer {
    pub fn bind(config: &config::ServerConfig) -> Result<Self, ServerError> {
        let address = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&address).map_err(|source| ServerError::Bind {
            address,
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::SetNonBlocking { source })?;

        Ok(Self {
            listener,
            read_poll_interval: Duration::from_millis(config.read_poll_interval_ms),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn try_accept(&self) -> Result<Option<Connection>, ServerError> {
        match self.listener.accept() {
            Ok((stream, peer_addr)) => {
                Connection::new(stream, peer_addr, self.read_poll_interval).map(Some)
            }
            Err(source) if source.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(source) if source.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(source) => Err(ServerError::Accept { source }),
        }
    }
}

/// Everything a session handler needs, shared by every connection.
pub struct ServerContext {
    pub config: Arc<AppConfig>,
    pub logger: Arc<Logger>,
    pub codec: Arc<WireCodec>,
    pub repository: Arc<QueueRepository>,
    pub registry: Arc<ConnectionRegistry>,
    pub access: Arc<dyn AccessControl>,
    pub shutdown: ShutdownSignal,
    enabled: AtomicBool,
}

impl ServerContext {
    pub fn new(
        config: Arc<AppConfig>,
        logger: Arc<Logger>,
        codec: Arc<WireCodec>,
        repository: Arc<QueueRepository>,
        registry: Arc<ConnectionRegistry>,
        access: Arc<dyn AccessControl>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let enabled = AtomicBool::new(config.server.enabled);
        Self {
            config,
            logger,
            codec,
            repository,
            registry,
            access,
            shutdown,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

/// Accept loop. Returns once the shutdown signal is raised, after every live
/// session has been told to terminate and its handler has exited.
pub fn serve(server: &TcpServer, context: Arc<ServerContext>) {
    let mut handlers: Vec<JoinHandle<()>> = Vec::new();

    while !context.shutdown.is_triggered() {
        let connection = match server.try_accept() {
            Ok(Some(connection)) => Arc::new(connection),
            Ok(None) => {
                handlers.retain(|handle| !handle.is_finished());
                thread::sleep(ACCEPT_IDLE_SLEEP);
                continue;
            }
            Err(error) => {
                context.logger.log(
                    LogLevel::Warn,
                    Some("server"),
                    "Accept failed",
                    Some(json!({"error": error.to_string()})),
                );
                thread::sleep(ACCEPT_IDLE_SLEEP);
                continue;
            }
        };

        if let Err(error) = context.registry.register_connection(Arc::clone(&connection)) {
            let RegistryError::ConnectionLimit { limit } = &error else {
                context.logger.error(Some("server"), &error.to_string());
                connection.shutdown();
                continue;
            };
            context.logger.log(
                LogLevel::Warn,
                Some("server"),
                "Connection refused",
                Some(json!({
                    "address": connection.address().to_string(),
                    "max_connections": limit,
                })),
            );
            connection.shutdown();
            continue;
        }

        context.logger.log(
            LogLevel::Info,
            Some("server"),
            "Connection accepted",
            Some(json!({
                "connection_id": connection.id().to_string(),
                "address": connection.address().to_string(),
            })),
        );

        let handler_context = Arc::clone(&context);
        let handler_connection = Arc::clone(&connection);
        let spawned = thread::Builder::new()
            .name(format!("kasmq-session-{}", connection.id()))
            .spawn(move || runtime::run_session(handler_context, handler_connection));
        match spawned {
            Ok(handle) => handlers.push(handle),
            Err(error) => {
                context.logger.log(
                    LogLevel::Error,
                    Some("server"),
                    "Failed to spawn session handler",
                    Some(json!({"error": error.to_string()})),
                );
                connection.shutdown();
                context.registry.remove_connection(connection.id());
            }
        }
    }

    context.logger.info(Some("server"), "Stopped accepting connections");
    context.registry.terminate_all();
    for handle in handlers {
        if handle.join().is_err() {
            context
                .logger
                .error(Some("server"), "Session handler panicked during shutdown");
        }
    }
}
