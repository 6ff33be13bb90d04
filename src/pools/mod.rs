use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::json;
use uuid::Uuid;

use crate::logging::{LogLevel, Logger};
use crate::queues::capped::{CapacityListener, CappedContainer, CappedStore};
use crate::server::Connection;
use crate::wire::session::{Session, SessionSnapshot};

#[derive(Debug, PartialEq, Eq)]
pub enum RegistryError {
    ConnectionLimit { limit: usize },
    UnknownConnection { connection_id: Uuid },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLimit { limit } => {
                write!(f, "connection limit of {limit} reached")
            }
            Self::UnknownConnection { connection_id } => {
                write!(f, "connection {connection_id} is not registered")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Default)]
pub struct ConnectionTable(HashMap<Uuid, Arc<Connection>>);

impl CappedStore for ConnectionTable {
    type Item = Arc<Connection>;

    fn insert(&mut self, item: Arc<Connection>) {
        self.0.insert(item.id(), item);
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

struct ConnectionCapacityLog {
    logger: Arc<Logger>,
}

impl CapacityListener for ConnectionCapacityLog {
    fn on_suspend(&self, _name: &str, size: usize, _threshold: usize) {
        self.logger.log(
            LogLevel::Warn,
            Some("pools"),
            "Connection limit reached, refusing new connections",
            Some(json!({"connections": size})),
        );
    }

    fn on_resume(&self, _name: &str, size: usize, _threshold: usize) {
        self.logger.log(
            LogLevel::Info,
            Some("pools"),
            "Accepting connections again",
            Some(json!({"connections": size})),
        );
    }
}

/// Live connections and sessions. Both maps are only touched under their own
/// mutex, so insertion at accept and removal at teardown are atomic and
/// removal is idempotent.
pub struct ConnectionRegistry {
    connections: Mutex<CappedContainer<ConnectionTable>>,
    sessions: Mutex<HashMap<Uuid, Arc<Session>>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// `max_connections == 0` leaves the registry unbounded.
    pub fn new(max_connections: usize, logger: Arc<Logger>) -> Self {
        let threshold = match max_connections {
            0 => usize::MAX,
            limit => limit - 1,
        };
        let connections = CappedContainer::new("connections", ConnectionTable::default(), threshold)
            .with_listener(Arc::new(ConnectionCapacityLog { logger }));

        Self {
            connections: Mutex::new(connections),
            sessions: Mutex::new(HashMap::new()),
            max_connections,
        }
    }

    pub fn register_connection(&self, connection: Arc<Connection>) -> Result<(), RegistryError> {
        self.connections
            .lock()
            .expect("connection registry lock poisoned")
            .admit(connection)
            .map(|_| ())
            .map_err(|_| RegistryError::ConnectionLimit {
                limit: self.max_connections,
            })
    }

    pub fn remove_connection(&self, connection_id: Uuid) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .expect("connection registry lock poisoned")
            .remove_with(|table| table.0.remove(&connection_id))
    }

    pub fn connection(&self, connection_id: Uuid) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .expect("connection registry lock poisoned")
            .store()
            .0
            .get(&connection_id)
            .cloned()
    }

    /// Oldest first.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        let mut connections = self
            .connections
            .lock()
            .expect("connection registry lock poisoned")
            .store()
            .0
            .values()
            .cloned()
            .collect::<Vec<_>>();
        connections.sort_by_key(|connection| connection.connected_at());
        connections
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .expect("connection registry lock poisoned")
            .len()
    }

    pub fn register_session(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        let connection_id = session.connection().id();
        if self.connection(connection_id).is_none() {
            return Err(RegistryError::UnknownConnection { connection_id });
        }

        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .insert(session.id(), session);
        Ok(())
    }

    pub fn remove_session(&self, session_id: Uuid) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .remove(&session_id)
    }

    pub fn session(&self, session_id: Uuid) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .get(&session_id)
            .cloned()
    }

    pub fn session_for_connection(&self, connection_id: Uuid) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .values()
            .find(|session| session.connection().id() == connection_id)
            .cloned()
    }

    /// Oldest first.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions = self
            .sessions
            .lock()
            .expect("session registry lock poisoned")
            .values()
            .cloned()
            .collect::<Vec<_>>();
        sessions.sort_by_key(|session| session.created_at());
        sessions
    }

    pub fn session_snapshots(&self) -> Vec<SessionSnapshot> {
        self.sessions().iter().map(|session| session.snapshot()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .len()
    }

    pub fn is_session_live(&self, session_id: Uuid) -> bool {
        self.session(session_id)
            .is_some_and(|session| !session.is_terminated())
    }

    /// Asks every session and connection to terminate. Handlers perform the
    /// actual teardown.
    pub fn terminate_all(&self) {
        for session in self.sessions() {
            session.terminate();
        }
        for connection in self.connections() {
            connection.request_close();
        }
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connection_count())
            .field("sessions", &self.session_count())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}
