use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::json;

use crate::logging::{LogLevel, Logger};
use crate::pools::ConnectionRegistry;
use crate::queues::QueueRepository;

pub const MIN_INTERVAL_MS: u64 = 100;
pub const MAX_INTERVAL_MS: u64 = 24 * 60 * 60 * 1_000;
const STOP_CHECK_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub enum JanitorError {
    InvalidInterval { provided_ms: u64 },
    AlreadyRunning,
    JoinFailed,
}

impl fmt::Display for JanitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInterval { provided_ms } => write!(
                f,
                "janitor interval must be within {MIN_INTERVAL_MS}..={MAX_INTERVAL_MS}ms, got {provided_ms}ms"
            ),
            Self::AlreadyRunning => write!(f, "janitor is already running"),
            Self::JoinFailed => write!(f, "janitor worker thread join failed"),
        }
    }
}

impl std::error::Error for JanitorError {}

/// Periodically removes empty TEMPORARY queues whose owning session is gone.
pub struct Janitor {
    interval: Duration,
    repository: Arc<QueueRepository>,
    registry: Arc<ConnectionRegistry>,
    logger: Arc<Logger>,
    stop_signal: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Janitor {
    pub fn new(
        interval_ms: u64,
        repository: Arc<QueueRepository>,
        registry: Arc<ConnectionRegistry>,
        logger: Arc<Logger>,
    ) -> Result<Self, JanitorError> {
        if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&interval_ms) {
            return Err(JanitorError::InvalidInterval {
                provided_ms: interval_ms,
            });
        }

        Ok(Self {
            interval: Duration::from_millis(interval_ms),
            repository,
            registry,
            logger,
            stop_signal: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    pub fn start(&mut self) -> Result<(), JanitorError> {
        if self.worker.is_some() {
            return Err(JanitorError::AlreadyRunning);
        }

        self.stop_signal.store(false, Ordering::SeqCst);
        let stop_signal = Arc::clone(&self.stop_signal);
        let repository = Arc::clone(&self.repository);
        let registry = Arc::clone(&self.registry);
        let logger = Arc::clone(&self.logger);
        let interval = self.interval;

        self.worker = Some(thread::spawn(move || loop {
            let next_sweep = Instant::now() + interval;
            while Instant::now() < next_sweep {
                if stop_signal.load(Ordering::SeqCst) {
                    return;
                }
                let remaining = next_sweep.saturating_duration_since(Instant::now());
                thread::sleep(STOP_CHECK_SLICE.min(remaining));
            }
            sweep(&repository, &registry, &logger);
        }));

        self.logger.log(
            LogLevel::Debug,
            Some("janitor"),
            "Temporary queue janitor started",
            Some(json!({"interval_ms": self.interval.as_millis() as u64})),
        );
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), JanitorError> {
        self.stop_signal.store(true, Ordering::SeqCst);

        if let Some(handle) = self.worker.take() {
            return handle.join().map_err(|_| JanitorError::JoinFailed);
        }

        Ok(())
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// One pass. Returns the removed queue names.
pub fn sweep(
    repository: &QueueRepository,
    registry: &ConnectionRegistry,
    logger: &Logger,
) -> Vec<String> {
    let removed = repository.remove_orphaned_temporaries(&|owner| registry.is_session_live(owner));
    if !removed.is_empty() {
        logger.log(
            LogLevel::Info,
            Some("janitor"),
            "Removed orphaned temporary queues",
            Some(json!({"queues": removed})),
        );
    }
    removed
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::logging::tests::memory_logger;
    use crate::logging::LogLevel;
    use crate::pools::ConnectionRegistry;
    use crate::queues::{Disposition, QueueRepository};
    use crate::wire::session::tests::loopback_connection;
    use crate::wire::session::Session;

    use super::{sweep, Janitor, JanitorError, MAX_INTERVAL_MS};

    #[test]
    fn rejects_intervals_outside_bounds() {
        let logger = Arc::new(memory_logger(LogLevel::Error).0);
        let janitor = |interval_ms| {
            Janitor::new(
                interval_ms,
                Arc::new(QueueRepository::new(Arc::clone(&logger), None)),
                Arc::new(ConnectionRegistry::new(0, Arc::clone(&logger))),
                Arc::clone(&logger),
            )
        };

        assert!(matches!(
            janitor(10),
            Err(JanitorError::InvalidInterval { provided_ms: 10 })
        ));
        assert!(matches!(
            janitor(u64::MAX),
            Err(JanitorError::InvalidInterval { provided_ms: u64::MAX })
        ));
        assert!(janitor(MAX_INTERVAL_MS).is_ok());
    }

    #[test]
    fn sweep_keeps_live_owned_and_non_empty_queues() {
        let (logger, sink) = memory_logger(LogLevel::Info);
        let logger = Arc::new(logger);
        let repository = QueueRepository::new(Arc::clone(&logger), None);
        let registry = ConnectionRegistry::new(0, Arc::clone(&logger));

        let (connection, _client) = loopback_connection();
        registry
            .register_connection(Arc::clone(&connection))
            .expect("connection should register");
        let live = Arc::new(Session::new(connection));
        registry
            .register_session(Arc::clone(&live))
            .expect("session should register");
        let gone = uuid::Uuid::new_v4();

        repository
            .define_queue("LIVE", 5, Disposition::Temporary, Some(live.id()))
            .expect("define should pass");
        repository
            .define_queue("ORPHAN", 5, Disposition::Temporary, Some(gone))
            .expect("define should pass");
        repository
            .define_queue("BUSY", 5, Disposition::Temporary, Some(gone))
            .expect("define should pass")
            .put(crate::message::Message::text("pending"))
            .expect("put should pass");
        repository
            .define_queue("KEEP", 5, Disposition::Permanent, None)
            .expect("define should pass");

        assert_eq!(sweep(&repository, &registry, &logger), vec!["ORPHAN".to_owned()]);
        assert!(sink.contains("Removed orphaned temporary queues"));

        live.terminate();
        assert_eq!(sweep(&repository, &registry, &logger), vec!["LIVE".to_owned()]);
        assert_eq!(repository.len(), 2);
    }

    #[test]
    fn worker_sweeps_until_stopped() {
        let logger = Arc::new(memory_logger(LogLevel::Error).0);
        let repository = Arc::new(QueueRepository::new(Arc::clone(&logger), None));
        repository
            .define_queue("TMP", 5, Disposition::Temporary, Some(uuid::Uuid::new_v4()))
            .expect("define should pass");

        let mut janitor = Janitor::new(
            100,
            Arc::clone(&repository),
            Arc::new(ConnectionRegistry::new(0, Arc::clone(&logger))),
            logger,
        )
        .expect("janitor should be created");
        janitor.start().expect("janitor should start");
        assert!(matches!(janitor.start(), Err(JanitorError::AlreadyRunning)));

        thread::sleep(Duration::from_millis(300));
        assert!(repository.is_empty());
        janitor.stop().expect("janitor should stop");
    }
}
