use std::fs;
use std::path::PathBuf;

use serde_json::json;

use crate::config::AppConfig;
use crate::logging::{LogLevel, Logger};
use crate::message::Message;
use crate::queues::QueueDefinition;
use crate::wire::codec::WireCodec;

use super::{
    expand_home_path, MemoryStorage, SledMode, SledStorage, StorageBackend, StorageEngine,
    StorageError,
};

pub struct StorageFacade {
    engine: StorageEngine,
    data_path: Option<PathBuf>,
    backend: Box<dyn StorageBackend>,
    codec: WireCodec,
}

impl StorageFacade {
    pub fn initialize(app_config: &AppConfig, logger: &Logger) -> Result<Self, StorageError> {
        let Some(engine) = StorageEngine::parse(&app_config.storage.engine) else {
            return Err(StorageError::UnsupportedEngine {
                engine: app_config.storage.engine.clone(),
            });
        };

        if engine == StorageEngine::Memory {
            logger.log(
                LogLevel::Warn,
                Some("storage::init"),
                "Memory storage selected; permanent queues will not survive a restart",
                None,
            );
            return Ok(Self::in_memory());
        }

        let data_path = expand_home_path(&app_config.storage.path)?;

        logger.log(
            LogLevel::Info,
            Some("storage::init"),
            "Initializing storage facade",
            Some(json!({
                "engine": engine.as_str(),
                "configured_path": app_config.storage.path,
                "resolved_path": data_path.display().to_string(),
                "sled": {
                    "cache_capacity": app_config.storage.sled.cache_capacity,
                    "mode": app_config.storage.sled.mode
                }
            })),
        );

        fs::create_dir_all(&data_path).map_err(|source| StorageError::CreateDataDir {
            path: data_path.clone(),
            source,
        })?;

        let mode = match app_config.storage.sled.mode.as_deref() {
            Some(raw) => Some(SledMode::parse(raw).ok_or_else(|| StorageError::InvalidSledMode {
                mode: raw.to_owned(),
            })?),
            None => None,
        };
        let backend = SledStorage::open(&data_path, app_config.storage.sled.cache_capacity, mode)?;

        logger.log(
            LogLevel::Info,
            Some("storage::init"),
            "Storage facade initialized",
            Some(json!({
                "engine": engine.as_str(),
                "resolved_path": data_path.display().to_string(),
            })),
        );

        Ok(Self {
            engine,
            data_path: Some(data_path),
            backend: Box::new(backend),
            codec: WireCodec::standard(),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            engine: StorageEngine::Memory,
            data_path: None,
            backend: Box::new(MemoryStorage::new()),
            codec: WireCodec::standard(),
        }
    }

    pub fn engine(&self) -> StorageEngine {
        self.engine
    }

    pub fn data_path(&self) -> Option<&PathBuf> {
        self.data_path.as_ref()
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.backend.flush()
    }

    pub fn load_queue_definitions(&self) -> Result<Vec<QueueDefinition>, StorageError> {
        self.backend.load_queue_definitions()
    }

    pub fn replace_queue_definitions(
        &self,
        definitions: &[QueueDefinition],
    ) -> Result<(), StorageError> {
        self.backend.replace_queue_definitions(definitions)
    }

    pub fn load_queue_backlog(&self, queue_name: &str) -> Result<Vec<Message>, StorageError> {
        let mut messages = Vec::new();
        for frame in self.backend.load_queue_backlog(queue_name)? {
            let decoded = self
                .codec
                .decode_slice(&frame)
                .map_err(|source| StorageError::DecodeMessage {
                    queue: queue_name.to_owned(),
                    source,
                })?;
            messages.extend(decoded);
        }
        Ok(messages)
    }

    pub fn persist_queue_backlog(
        &self,
        queue_name: &str,
        messages: &[Message],
    ) -> Result<(), StorageError> {
        let frames = messages
            .iter()
            .map(|message| {
                self.codec
                    .encode(message)
                    .map(|frame| frame.to_vec())
                    .map_err(|source| StorageError::EncodeMessage {
                        queue: queue_name.to_owned(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.backend.persist_queue_backlog(queue_name, &frames)
    }

    pub fn discard_queue_backlog(&self, queue_name: &str) -> Result<(), StorageError> {
        self.backend.discard_queue_backlog(queue_name)
    }
}
