mod backend;
mod engine;
mod error;
mod facade;
mod memory_backend;
mod path;
mod sled_backend;

pub use backend::StorageBackend;
pub use engine::{SledMode, StorageEngine};
pub use error::StorageError;
pub use facade::StorageFacade;
pub use memory_backend::MemoryStorage;
use path::expand_home_path;
pub use sled_backend::SledStorage;

#[cfg(test)]
mod tests {
    use crate::config::{AppConfig, StorageConfig};
    use crate::logging::tests::silent_logger;
    use crate::message::Message;
    use crate::queues::{Disposition, QueueDefinition};
    use crate::storage::{StorageEngine, StorageError, StorageFacade};

    use super::expand_home_path;

    fn sled_storage(path: &str) -> StorageFacade {
        let app_config = AppConfig {
            storage: StorageConfig {
                engine: "sled".to_owned(),
                path: path.to_owned(),
                ..StorageConfig::default()
            },
            ..AppConfig::default()
        };
        StorageFacade::initialize(&app_config, &silent_logger()).expect("storage init should work")
    }

    fn unique_temp_path(label: &str) -> String {
        let path = std::env::temp_dir().join(format!(
            "kasmq-storage-test-{label}-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        path.to_string_lossy().to_string()
    }

    fn definition(name: &str, threshold: usize) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            threshold,
            disposition: Disposition::Permanent,
        }
    }

    #[test]
    fn expands_tilde_prefix_to_home() {
        let home = std::env::var("HOME").expect("HOME should be available in tests");
        let expanded = expand_home_path("~/.kasmq/data").expect("expansion should work");
        assert_eq!(expanded, std::path::Path::new(&home).join(".kasmq/data"));
    }

    #[test]
    fn expands_home_env_prefix() {
        let home = std::env::var("HOME").expect("HOME should be available in tests");
        let expanded = expand_home_path("$HOME/.kasmq/data").expect("expansion should work");
        assert_eq!(expanded, std::path::Path::new(&home).join(".kasmq/data"));
    }

    #[test]
    fn keeps_absolute_paths_unchanged() {
        let expanded = expand_home_path("/var/lib/kasmq/data").expect("expansion should work");
        assert_eq!(expanded, std::path::PathBuf::from("/var/lib/kasmq/data"));
    }

    #[test]
    fn rejects_unknown_engine() {
        let app_config = AppConfig {
            storage: StorageConfig {
                engine: "rocks".to_owned(),
                ..StorageConfig::default()
            },
            ..AppConfig::default()
        };
        let error = StorageFacade::initialize(&app_config, &silent_logger())
            .err()
            .expect("unknown engine should fail");
        assert!(matches!(error, StorageError::UnsupportedEngine { .. }));
    }

    #[test]
    fn sled_definitions_replace_and_load_roundtrip() {
        let path = unique_temp_path("definitions");
        let storage = sled_storage(&path);
        assert_eq!(storage.engine(), StorageEngine::Sled);

        storage
            .replace_queue_definitions(&[definition("B", 2), definition("A", 1)])
            .expect("definitions persist should pass");
        storage
            .replace_queue_definitions(&[definition("C", 3), definition("A", 1)])
            .expect("definitions replace should pass");

        let loaded = storage.load_queue_definitions().expect("load should pass");
        assert_eq!(loaded, vec![definition("A", 1), definition("C", 3)]);

        let _ = std::fs::remove_dir_all(path);
    }

    #[test]
    fn sled_backlog_keeps_order_and_isolates_queues() {
        let path = unique_temp_path("backlog");
        let storage = sled_storage(&path);

        let first = Message::text("first").with_priority(9);
        let second = Message::bytes(vec![1, 2]).with_property("k", 1_i32);
        storage
            .persist_queue_backlog("ORD", &[first.clone(), second.clone()])
            .expect("backlog persist should pass");
        storage
            .persist_queue_backlog("ORD2", &[Message::text("other")])
            .expect("backlog persist should pass");

        let loaded = storage.load_queue_backlog("ORD").expect("backlog load should pass");
        assert_eq!(loaded, vec![first, second]);

        storage.discard_queue_backlog("ORD").expect("discard should pass");
        assert!(storage.load_queue_backlog("ORD").expect("load should pass").is_empty());
        assert_eq!(storage.load_queue_backlog("ORD2").expect("load should pass").len(), 1);
        storage.flush().expect("flush should pass");

        let _ = std::fs::remove_dir_all(path);
    }

    #[test]
    fn memory_backend_behaves_like_sled() {
        let storage = StorageFacade::in_memory();
        assert!(storage.data_path().is_none());

        storage
            .replace_queue_definitions(&[definition("Z", 9)])
            .expect("definitions persist should pass");
        storage
            .persist_queue_backlog("Z", &[Message::text("m")])
            .expect("backlog persist should pass");

        assert_eq!(
            storage.load_queue_definitions().expect("load should pass"),
            vec![definition("Z", 9)]
        );
        assert_eq!(storage.load_queue_backlog("Z").expect("load should pass").len(), 1);
    }
}
