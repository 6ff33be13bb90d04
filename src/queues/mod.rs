pub mod capped;
pub mod repository;
pub mod store;

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Message;

use capped::{Admission, CapacityListener, CappedContainer};
use store::PriorityBuckets;

pub use repository::{QueueAlteration, QueueRepository, RepositoryError};

pub const MAX_QUEUE_NAME_LEN: usize = 64;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Permanent,
    Temporary,
}

impl Disposition {
    pub fn name(self) -> &'static str {
        match self {
            Self::Permanent => "PERMANENT",
            Self::Temporary => "TEMPORARY",
        }
    }
}

/// Queue names are stored upper-cased.
pub fn normalize_queue_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

/// `[A-Za-z0-9_.$-]{1,64}`
pub fn is_valid_queue_name(name: &str) -> bool {
    (1..=MAX_QUEUE_NAME_LEN).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'$' | b'-'))
}

#[derive(Debug, PartialEq, Eq)]
pub enum QueueError {
    Suspended { queue: String },
    Closed { queue: String },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suspended { queue } => write!(f, "queue '{queue}' is suspended"),
            Self::Closed { queue } => write!(f, "queue '{queue}' has been deleted"),
        }
    }
}

impl std::error::Error for QueueError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Accepted,
    AcceptedAndSuspended,
}

/// Persisted shape of a PERMANENT queue.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueDefinition {
    pub name: String,
    pub threshold: usize,
    pub disposition: Disposition,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub name: String,
    pub threshold: usize,
    pub disposition: Disposition,
    pub size: usize,
    pub suspended: bool,
    pub owner: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

struct QueueState {
    messages: CappedContainer<PriorityBuckets>,
    disposition: Disposition,
    owner: Option<Uuid>,
    closed: bool,
}

/// A named queue. Producers and consumers synchronize on the queue's own
/// mutex; a put wakes one blocked getter early.
pub struct Queue {
    name: String,
    created_at: DateTime<Utc>,
    state: Mutex<QueueState>,
    available: Condvar,
}

impl Queue {
    pub fn new(
        name: &str,
        threshold: usize,
        disposition: Disposition,
        owner: Option<Uuid>,
        listener: Option<Arc<dyn CapacityListener>>,
    ) -> Self {
        let name = normalize_queue_name(name);
        let mut messages = CappedContainer::new(name.clone(), PriorityBuckets::new(), threshold);
        if let Some(listener) = listener {
            messages = messages.with_listener(listener);
        }

        Self {
            name,
            created_at: Utc::now(),
            state: Mutex::new(QueueState {
                messages,
                disposition,
                owner,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn put(&self, message: Message) -> Result<PutOutcome, QueueError> {
        let mut state = self.state.lock().expect("queue state lock poisoned");
        if state.closed {
            return Err(QueueError::Closed {
                queue: self.name.clone(),
            });
        }

        let outcome = match state.messages.admit(message) {
            Ok(Admission::Accepted) => PutOutcome::Accepted,
            Ok(Admission::AcceptedAndSuspended) => PutOutcome::AcceptedAndSuspended,
            Err(_) => {
                return Err(QueueError::Suspended {
                    queue: self.name.clone(),
                })
            }
        };
        drop(state);

        self.available.notify_one();
        Ok(outcome)
    }

    /// Blocks until a message arrives, `timeout` elapses, the queue is closed,
    /// or `cancelled` reports true. `None`, or a timeout too large to represent,
    /// waits indefinitely. The condition is re-checked at least every
    /// `poll_interval`.
    pub fn get(
        &self,
        timeout: Option<Duration>,
        poll_interval: Duration,
        cancelled: &dyn Fn() -> bool,
    ) -> Option<Message> {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let poll_interval = poll_interval.max(Duration::from_millis(1));
        let mut state = self.state.lock().expect("queue state lock poisoned");

        loop {
            if let Some(message) = state.messages.remove_with(PriorityBuckets::pop_highest) {
                return Some(message);
            }
            if state.closed || cancelled() {
                return None;
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    poll_interval.min(deadline - now)
                }
                None => poll_interval,
            };

            state = self
                .available
                .wait_timeout(state, wait)
                .expect("queue state lock poisoned")
                .0;
        }
    }

    /// `owner` is recorded only when the queue becomes TEMPORARY without one.
    pub fn alter(
        &self,
        threshold: Option<usize>,
        disposition: Option<Disposition>,
        owner: Option<Uuid>,
    ) {
        let mut state = self.state.lock().expect("queue state lock poisoned");
        if let Some(threshold) = threshold {
            state.messages.set_threshold(threshold);
        }
        match disposition {
            Some(Disposition::Permanent) => {
                state.disposition = Disposition::Permanent;
                state.owner = None;
            }
            Some(Disposition::Temporary) => {
                state.disposition = Disposition::Temporary;
                if state.owner.is_none() {
                    state.owner = owner;
                }
            }
            None => {}
        }
    }

    /// Marks the queue deleted and wakes every blocked getter.
    pub fn close(&self) {
        self.state.lock().expect("queue state lock poisoned").closed = true;
        self.available.notify_all();
    }

    /// Closes the queue unless it holds messages and `force` is unset. The
    /// size check and the close share one lock, so a racing put either lands
    /// first and is reported back as `Err(size)` or is refused as closed.
    pub fn close_if(&self, force: bool) -> Result<usize, usize> {
        let mut state = self.state.lock().expect("queue state lock poisoned");
        let size = state.messages.len();
        if size > 0 && !force {
            return Err(size);
        }
        state.closed = true;
        drop(state);

        self.available.notify_all();
        Ok(size)
    }

    /// Closes an empty TEMPORARY queue whose owner is no longer live.
    pub fn close_if_orphaned(&self, is_session_live: &dyn Fn(Uuid) -> bool) -> bool {
        let mut state = self.state.lock().expect("queue state lock poisoned");
        let orphaned = state.disposition == Disposition::Temporary
            && state.messages.is_empty()
            && !state.owner.is_some_and(is_session_live);
        if orphaned {
            state.closed = true;
            drop(state);
            self.available.notify_all();
        }
        orphaned
    }

    pub fn restore(&self, messages: Vec<Message>) {
        self.state
            .lock()
            .expect("queue state lock poisoned")
            .messages
            .restore(messages);
        self.available.notify_all();
    }

    /// Pending messages in delivery order.
    pub fn backlog(&self) -> Vec<Message> {
        self.state
            .lock()
            .expect("queue state lock poisoned")
            .messages
            .store()
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("queue state lock poisoned").messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_suspended(&self) -> bool {
        self.state
            .lock()
            .expect("queue state lock poisoned")
            .messages
            .is_suspended()
    }

    pub fn disposition(&self) -> Disposition {
        self.state.lock().expect("queue state lock poisoned").disposition
    }

    pub fn owner(&self) -> Option<Uuid> {
        self.state.lock().expect("queue state lock poisoned").owner
    }

    pub fn definition(&self) -> QueueDefinition {
        let state = self.state.lock().expect("queue state lock poisoned");
        QueueDefinition {
            name: self.name.clone(),
            threshold: state.messages.threshold(),
            disposition: state.disposition,
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().expect("queue state lock poisoned");
        QueueSnapshot {
            name: self.name.clone(),
            threshold: state.messages.threshold(),
            disposition: state.disposition,
            size: state.messages.len(),
            suspended: state.messages.is_suspended(),
            owner: state.owner,
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("name", &self.name).finish()
    }
}
