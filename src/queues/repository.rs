use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::json;
use uuid::Uuid;

use crate::logging::{LogLevel, Logger};
use crate::storage::{StorageError, StorageFacade};
use crate::utils::pattern::NamePattern;

use super::capped::CapacityListener;
use super::{normalize_queue_name, Disposition, Queue, QueueSnapshot};

#[derive(Debug, PartialEq, Eq)]
pub enum RepositoryError {
    AlreadyExists { name: String },
    NotFound { name: String },
    NotEmpty { name: String, size: usize },
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists { name } => write!(f, "queue '{name}' already exists"),
            Self::NotFound { name } => write!(f, "queue '{name}' not found"),
            Self::NotEmpty { name, size } => {
                write!(f, "queue '{name}' is not empty ({size} messages)")
            }
        }
    }
}

impl std::error::Error for RepositoryError {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueAlteration {
    pub threshold: Option<usize>,
    pub disposition: Option<Disposition>,
    /// Session adopting a queue switched to TEMPORARY.
    pub owner: Option<Uuid>,
}

impl QueueAlteration {
    pub fn is_empty(&self) -> bool {
        self.threshold.is_none() && self.disposition.is_none()
    }
}

struct CapacityLog {
    logger: Arc<Logger>,
}

impl CapacityListener for CapacityLog {
    fn on_suspend(&self, name: &str, size: usize, threshold: usize) {
        self.logger.log(
            LogLevel::Warn,
            Some("queues::capacity"),
            "Queue suspended",
            Some(json!({"queue": name, "size": size, "threshold": threshold})),
        );
    }

    fn on_resume(&self, name: &str, size: usize, threshold: usize) {
        self.logger.log(
            LogLevel::Info,
            Some("queues::capacity"),
            "Queue resumed",
            Some(json!({"queue": name, "size": size, "threshold": threshold})),
        );
    }
}

/// Named queues shared by every session. The map lock covers lookups and
/// structural changes only; blocking gets run on the queue's own lock.
pub struct QueueRepository {
    queues: RwLock<HashMap<String, Arc<Queue>>>,
    storage: Option<Arc<StorageFacade>>,
    logger: Arc<Logger>,
    capacity_log: Arc<dyn CapacityListener>,
}

impl QueueRepository {
    pub fn new(logger: Arc<Logger>, storage: Option<Arc<StorageFacade>>) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            storage,
            capacity_log: Arc::new(CapacityLog {
                logger: Arc::clone(&logger),
            }),
            logger,
        }
    }

    pub fn define_queue(
        &self,
        name: &str,
        threshold: usize,
        disposition: Disposition,
        owner: Option<Uuid>,
    ) -> Result<Arc<Queue>, RepositoryError> {
        let name = normalize_queue_name(name);
        let owner = match disposition {
            Disposition::Temporary => owner,
            Disposition::Permanent => None,
        };

        let queue = {
            let mut queues = self.queues.write().expect("queue repository lock poisoned");
            if queues.contains_key(&name) {
                return Err(RepositoryError::AlreadyExists { name });
            }
            let queue = Arc::new(Queue::new(
                &name,
                threshold,
                disposition,
                owner,
                Some(Arc::clone(&self.capacity_log)),
            ));
            queues.insert(name.clone(), Arc::clone(&queue));
            queue
        };

        self.logger.log(
            LogLevel::Info,
            Some("queues::repository"),
            "Queue defined",
            Some(json!({
                "queue": name,
                "threshold": threshold,
                "disposition": disposition.name(),
                "owner": owner.map(|id| id.to_string()),
            })),
        );

        if disposition == Disposition::Permanent {
            self.persist_definitions();
        }
        Ok(queue)
    }

    pub fn delete_queue(&self, name: &str, force: bool) -> Result<Arc<Queue>, RepositoryError> {
        let name = normalize_queue_name(name);
        let (queue, discarded) = {
            let mut queues = self.queues.write().expect("queue repository lock poisoned");
            let Some(queue) = queues.get(&name) else {
                return Err(RepositoryError::NotFound { name });
            };
            let discarded = match queue.close_if(force) {
                Ok(discarded) => discarded,
                Err(size) => return Err(RepositoryError::NotEmpty { name, size }),
            };
            let queue = queues
                .remove(&name)
                .ok_or(RepositoryError::NotFound { name: name.clone() })?;
            (queue, discarded)
        };

        self.logger.log(
            LogLevel::Info,
            Some("queues::repository"),
            "Queue deleted",
            Some(json!({"queue": name, "force": force, "discarded": discarded})),
        );

        if queue.disposition() == Disposition::Permanent {
            if let Some(storage) = &self.storage {
                if let Err(error) = storage.discard_queue_backlog(&name) {
                    self.log_storage_failure("discard backlog", &error);
                }
            }
            self.persist_definitions();
        }
        Ok(queue)
    }

    pub fn alter_queue(
        &self,
        name: &str,
        alteration: QueueAlteration,
    ) -> Result<QueueSnapshot, RepositoryError> {
        let queue = self.get(name).ok_or_else(|| RepositoryError::NotFound {
            name: normalize_queue_name(name),
        })?;
        let before = queue.disposition();
        queue.alter(alteration.threshold, alteration.disposition, alteration.owner);
        let snapshot = queue.snapshot();

        self.logger.log(
            LogLevel::Info,
            Some("queues::repository"),
            "Queue altered",
            Some(json!({
                "queue": snapshot.name,
                "threshold": snapshot.threshold,
                "disposition": snapshot.disposition.name(),
            })),
        );

        if before == Disposition::Permanent || snapshot.disposition == Disposition::Permanent {
            if before == Disposition::Permanent && snapshot.disposition == Disposition::Temporary {
                if let Some(storage) = &self.storage {
                    if let Err(error) = storage.discard_queue_backlog(&snapshot.name) {
                        self.log_storage_failure("discard backlog", &error);
                    }
                }
            }
            self.persist_definitions();
        }
        Ok(snapshot)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues
            .read()
            .expect("queue repository lock poisoned")
            .get(&normalize_queue_name(name))
            .cloned()
    }

    /// All queues, ordered by name.
    pub fn list(&self) -> Vec<Arc<Queue>> {
        let mut queues = self
            .queues
            .read()
            .expect("queue repository lock poisoned")
            .values()
            .cloned()
            .collect::<Vec<_>>();
        queues.sort_by(|a, b| a.name().cmp(b.name()));
        queues
    }

    pub fn matching(&self, pattern: &NamePattern) -> Vec<Arc<Queue>> {
        self.list()
            .into_iter()
            .filter(|queue| pattern.matches(queue.name()))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<QueueSnapshot> {
        self.list().iter().map(|queue| queue.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.queues.read().expect("queue repository lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deletes empty TEMPORARY queues whose owning session is gone. Returns
    /// the removed names.
    pub fn remove_orphaned_temporaries(&self, is_session_live: &dyn Fn(Uuid) -> bool) -> Vec<String> {
        let removed = {
            let mut queues = self.queues.write().expect("queue repository lock poisoned");
            let orphaned = queues
                .values()
                .filter(|queue| queue.close_if_orphaned(is_session_live))
                .map(|queue| queue.name().to_owned())
                .collect::<Vec<_>>();

            orphaned
                .into_iter()
                .filter(|name| queues.remove(name).is_some())
                .collect::<Vec<_>>()
        };
        removed
    }

    /// Recreates PERMANENT queues and their backlogs from storage.
    pub fn restore_from_storage(&self) -> Result<usize, StorageError> {
        let Some(storage) = &self.storage else {
            return Ok(0);
        };

        let definitions = storage.load_queue_definitions()?;
        let mut restored_messages = 0;
        for definition in &definitions {
            let backlog = storage.load_queue_backlog(&definition.name)?;
            restored_messages += backlog.len();

            let queue = Arc::new(Queue::new(
                &definition.name,
                definition.threshold,
                Disposition::Permanent,
                None,
                Some(Arc::clone(&self.capacity_log)),
            ));
            queue.restore(backlog);
            self.queues
                .write()
                .expect("queue repository lock poisoned")
                .insert(queue.name().to_owned(), queue);
        }

        self.logger.log(
            LogLevel::Info,
            Some("queues::repository"),
            "Restored permanent queues",
            Some(json!({"queues": definitions.len(), "messages": restored_messages})),
        );
        Ok(definitions.len())
    }

    /// Writes PERMANENT definitions and backlogs. Returns the number of
    /// messages written.
    pub fn persist_to_storage(&self) -> Result<usize, StorageError> {
        let Some(storage) = &self.storage else {
            return Ok(0);
        };

        let permanent = self
            .list()
            .into_iter()
            .filter(|queue| queue.disposition() == Disposition::Permanent)
            .collect::<Vec<_>>();

        let definitions = permanent.iter().map(|queue| queue.definition()).collect::<Vec<_>>();
        storage.replace_queue_definitions(&definitions)?;

        let mut persisted = 0;
        for queue in &permanent {
            let backlog = queue.backlog();
            persisted += backlog.len();
            storage.persist_queue_backlog(queue.name(), &backlog)?;
        }
        storage.flush()?;

        self.logger.log(
            LogLevel::Info,
            Some("queues::repository"),
            "Persisted permanent queues",
            Some(json!({"queues": permanent.len(), "messages": persisted})),
        );
        Ok(persisted)
    }

    /// Closes every queue, releasing blocked getters.
    pub fn close_all(&self) {
        for queue in self.list() {
            queue.close();
        }
    }

    fn persist_definitions(&self) {
        let Some(storage) = &self.storage else {
            return;
        };

        let definitions = self
            .list()
            .iter()
            .filter(|queue| queue.disposition() == Disposition::Permanent)
            .map(|queue| queue.definition())
            .collect::<Vec<_>>();
        if let Err(error) = storage.replace_queue_definitions(&definitions) {
            self.log_storage_failure("persist definitions", &error);
        }
    }

    fn log_storage_failure(&self, operation: &str, error: &StorageError) {
        self.logger.log(
            LogLevel::Error,
            Some("queues::repository"),
            "Storage operation failed",
            Some(json!({"operation": operation, "error": error.to_string()})),
        );
    }
}
