use crate::queues::QueueDefinition;

use super::StorageError;

/// Raw persistence operations. Backlog entries are encoded wire frames kept in
/// delivery order; the facade does the encoding.
pub trait StorageBackend: Send + Sync {
    fn flush(&self) -> Result<(), StorageError>;
    fn load_queue_definitions(&self) -> Result<Vec<QueueDefinition>, StorageError>;
    fn replace_queue_definitions(&self, definitions: &[QueueDefinition]) -> Result<(), StorageError>;
    fn load_queue_backlog(&self, queue_name: &str) -> Result<Vec<Vec<u8>>, StorageError>;
    fn persist_queue_backlog(&self, queue_name: &str, frames: &[Vec<u8>]) -> Result<(), StorageError>;
    fn discard_queue_backlog(&self, queue_name: &str) -> Result<(), StorageError>;
}
