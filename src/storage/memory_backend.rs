use std::collections::HashMap;
use std::sync::Mutex;

use crate::queues::QueueDefinition;

use super::{StorageBackend, StorageError};

/// Process-local backend; nothing survives a restart of the process.
#[derive(Default)]
pub struct MemoryStorage {
    definitions: Mutex<Vec<QueueDefinition>>,
    backlogs: Mutex<HashMap<String, Vec<Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn load_queue_definitions(&self) -> Result<Vec<QueueDefinition>, StorageError> {
        let mut definitions = self
            .definitions
            .lock()
            .expect("memory storage definitions lock poisoned")
            .clone();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(definitions)
    }

    fn replace_queue_definitions(&self, definitions: &[QueueDefinition]) -> Result<(), StorageError> {
        *self
            .definitions
            .lock()
            .expect("memory storage definitions lock poisoned") = definitions.to_vec();
        Ok(())
    }

    fn load_queue_backlog(&self, queue_name: &str) -> Result<Vec<Vec<u8>>, StorageError> {
        Ok(self
            .backlogs
            .lock()
            .expect("memory storage backlog lock poisoned")
            .get(queue_name)
            .cloned()
            .unwrap_or_default())
    }

    fn persist_queue_backlog(&self, queue_name: &str, frames: &[Vec<u8>]) -> Result<(), StorageError> {
        self.backlogs
            .lock()
            .expect("memory storage backlog lock poisoned")
            .insert(queue_name.to_owned(), frames.to_vec());
        Ok(())
    }

    fn discard_queue_backlog(&self, queue_name: &str) -> Result<(), StorageError> {
        self.backlogs
            .lock()
            .expect("memory storage backlog lock poisoned")
            .remove(queue_name);
        Ok(())
    }
}
