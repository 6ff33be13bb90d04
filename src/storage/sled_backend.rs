use std::path::Path;

use crate::queues::QueueDefinition;

use super::{SledMode, StorageBackend, StorageError};

pub struct SledStorage {
    db: sled::Db,
}

const KEYSPACE_VERSION: &str = "v1";
const DEFINITION_PREFIX: &[u8] = b"v1:q:";

impl SledStorage {
    pub fn open(
        data_path: &Path,
        cache_capacity: Option<u64>,
        mode: Option<SledMode>,
    ) -> Result<Self, StorageError> {
        let mut config = sled::Config::new().path(data_path);

        if let Some(cache_capacity) = cache_capacity {
            config = config.cache_capacity(cache_capacity);
        }

        if let Some(mode) = mode {
            config = config.mode(match mode {
                SledMode::LowSpace => sled::Mode::LowSpace,
                SledMode::HighThroughput => sled::Mode::HighThroughput,
            });
        }

        let db = config.open().map_err(StorageError::Sled)?;
        Ok(Self { db })
    }

    fn remove_prefix(&self, prefix: &[u8], batch: &mut sled::Batch) -> Result<(), StorageError> {
        for entry in self.db.scan_prefix(prefix) {
            let (key, _) = entry.map_err(StorageError::Sled)?;
            batch.remove(key);
        }
        Ok(())
    }
}

fn definition_key(queue_name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(DEFINITION_PREFIX.len() + queue_name.len());
    key.extend_from_slice(DEFINITION_PREFIX);
    key.extend_from_slice(queue_name.as_bytes());
    key
}

// Queue names never contain ':', so the trailing separator keeps one queue's
// prefix from matching another's.
fn backlog_prefix(queue_name: &str) -> String {
    format!("{KEYSPACE_VERSION}:b:{queue_name}:")
}

fn backlog_key(queue_name: &str, sequence: usize) -> String {
    format!("{}{sequence:020}", backlog_prefix(queue_name))
}

impl StorageBackend for SledStorage {
    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map(|_| ()).map_err(StorageError::Sled)
    }

    fn load_queue_definitions(&self) -> Result<Vec<QueueDefinition>, StorageError> {
        let mut definitions = Vec::new();
        for entry in self.db.scan_prefix(DEFINITION_PREFIX) {
            let (_, value) = entry.map_err(StorageError::Sled)?;
            let definition: QueueDefinition = serde_json::from_slice(value.as_ref())
                .map_err(StorageError::DeserializeDefinition)?;
            definitions.push(definition);
        }
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(definitions)
    }

    fn replace_queue_definitions(&self, definitions: &[QueueDefinition]) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        self.remove_prefix(DEFINITION_PREFIX, &mut batch)?;

        for definition in definitions {
            let value =
                serde_json::to_vec(definition).map_err(StorageError::SerializeDefinition)?;
            batch.insert(definition_key(&definition.name), value);
        }

        self.db.apply_batch(batch).map_err(StorageError::Sled)?;
        self.db.flush().map_err(StorageError::Sled)?;
        Ok(())
    }

    fn load_queue_backlog(&self, queue_name: &str) -> Result<Vec<Vec<u8>>, StorageError> {
        self.db
            .scan_prefix(backlog_prefix(queue_name).as_bytes())
            .map(|entry| {
                entry
                    .map(|(_, value)| value.to_vec())
                    .map_err(StorageError::Sled)
            })
            .collect()
    }

    fn persist_queue_backlog(&self, queue_name: &str, frames: &[Vec<u8>]) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        self.remove_prefix(backlog_prefix(queue_name).as_bytes(), &mut batch)?;

        for (sequence, frame) in frames.iter().enumerate() {
            batch.insert(backlog_key(queue_name, sequence).as_bytes(), frame.as_slice());
        }

        self.db.apply_batch(batch).map_err(StorageError::Sled)
    }

    fn discard_queue_backlog(&self, queue_name: &str) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        self.remove_prefix(backlog_prefix(queue_name).as_bytes(), &mut batch)?;
        self.db.apply_batch(batch).map_err(StorageError::Sled)
    }
}
