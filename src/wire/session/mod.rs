pub mod runtime;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::security::UserEntity;
use crate::server::Connection;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Active { user: UserEntity },
    Terminated,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Active { .. } => "ACTIVE",
            Self::Terminated => "TERMINATED",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SessionError {
    AlreadyAuthenticated { user: String },
    Terminated { session_id: Uuid },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyAuthenticated { user } => {
                write!(f, "session already authenticated as '{user}'")
            }
            Self::Terminated { session_id } => write!(f, "session {session_id} is terminated"),
        }
    }
}

impl std::error::Error for SessionError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub address: String,
    pub state: &'static str,
    pub user: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_request_at: Option<DateTime<Utc>>,
    pub requests: u64,
}

/// Per-connection protocol state, created when the first frame arrives.
/// `Terminated` is absorbing.
pub struct Session {
    id: Uuid,
    connection: Arc<Connection>,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    last_request_at: Mutex<Option<DateTime<Utc>>>,
    requests: AtomicU64,
    terminated: AtomicBool,
}

impl Session {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection,
            created_at: Utc::now(),
            state: Mutex::new(SessionState::Unauthenticated),
            last_request_at: Mutex::new(None),
            requests: AtomicU64::new(0),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().expect("session state lock poisoned").clone()
    }

    pub fn user(&self) -> Option<UserEntity> {
        match &*self.state.lock().expect("session state lock poisoned") {
            SessionState::Active { user } => Some(user.clone()),
            _ => None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Unauthenticated -> Active.
    pub fn authenticate(&self, user: UserEntity) -> Result<(), SessionError> {
        let mut state = self.state.lock().expect("session state lock poisoned");
        match &*state {
            SessionState::Active { user: current } => {
                return Err(SessionError::AlreadyAuthenticated {
                    user: current.name.clone(),
                })
            }
            SessionState::Terminated => {
                return Err(SessionError::Terminated {
                    session_id: self.id,
                })
            }
            SessionState::Unauthenticated => {}
        }

        *state = SessionState::Active { user };
        Ok(())
    }

    /// Counts a request and returns the running total.
    pub fn record_request(&self) -> u64 {
        *self
            .last_request_at
            .lock()
            .expect("session request timestamp lock poisoned") = Some(Utc::now());
        self.requests.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Moves to `Terminated` and flags the connection for close. Returns true
    /// only for the call that performed the transition.
    pub fn terminate(&self) -> bool {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.state.lock().expect("session state lock poisoned") = SessionState::Terminated;
        self.connection.request_close();
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        SessionSnapshot {
            id: self.id,
            connection_id: self.connection.id(),
            address: self.connection.address().to_string(),
            state: state.name(),
            user: match state {
                SessionState::Active { user } => Some(user.name),
                _ => None,
            },
            created_at: self.created_at,
            last_request_at: *self
                .last_request_at
                .lock()
                .expect("session request timestamp lock poisoned"),
            requests: self.request_count(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connection_id", &self.connection.id())
            .field("state", &self.state().name())
            .finish()
    }
}

#[cfg(test)]
pub mod tests {
    use std::net::TcpStream;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::config::ServerConfig;
    use crate::security::UserEntity;
    use crate::server::{Connection, TcpServer};

    use super::{Session, SessionError, SessionState};

    /// Accepts one loopback connection. The client half is returned so the
    /// socket stays open for the duration of the test.
    pub fn loopback_connection() -> (Arc<Connection>, TcpStream) {
        let server = TcpServer::bind(&ServerConfig {
            host: "127.0.0.1".to_owned(),
            port: 0,
            read_poll_interval_ms: 20,
            ..ServerConfig::default()
        })
        .expect("server should bind");
        let addr = server.local_addr().expect("local addr should exist");
        let client = TcpStream::connect(addr).expect("client should connect");

        for _ in 0..100 {
            if let Some(connection) = server.try_accept().expect("accept poll should not fail") {
                return (Arc::new(connection), client);
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("loopback connection was not accepted");
    }

    fn user(name: &str) -> UserEntity {
        UserEntity {
            name: name.to_owned(),
            groups: vec!["ADMINS".to_owned()],
        }
    }

    #[test]
    fn authenticates_once() {
        let (connection, _client) = loopback_connection();
        let session = Session::new(connection);
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(session.user().is_none());

        session.authenticate(user("alice")).expect("first login should pass");
        assert_eq!(session.user().map(|user| user.name), Some("alice".to_owned()));
        assert_eq!(
            session.authenticate(user("bob")),
            Err(SessionError::AlreadyAuthenticated {
                user: "alice".to_owned()
            })
        );
    }

    #[test]
    fn termination_is_absorbing_and_happens_once() {
        let (connection, _client) = loopback_connection();
        let session = Session::new(Arc::clone(&connection));

        assert!(session.terminate());
        assert!(!session.terminate());
        assert!(session.is_terminated());
        assert!(!connection.is_open());
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(matches!(
            session.authenticate(user("alice")),
            Err(SessionError::Terminated { .. })
        ));
    }

    #[test]
    fn snapshot_tracks_requests() {
        let (connection, _client) = loopback_connection();
        let session = Session::new(connection);
        assert_eq!(session.record_request(), 1);
        assert_eq!(session.record_request(), 2);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.state, "UNAUTHENTICATED");
        assert!(snapshot.last_request_at.is_some());
        assert!(snapshot.user.is_none());
    }
}
