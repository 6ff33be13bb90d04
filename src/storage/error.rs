use std::fmt;
use std::path::PathBuf;

use crate::wire::codec::CodecError;

#[derive(Debug)]
pub enum StorageError {
    UnsupportedEngine {
        engine: String,
    },
    InvalidSledMode {
        mode: String,
    },
    HomeDirectoryUnavailable,
    CreateDataDir {
        path: PathBuf,
        source: std::io::Error,
    },
    SerializeDefinition(serde_json::Error),
    DeserializeDefinition(serde_json::Error),
    EncodeMessage {
        queue: String,
        source: CodecError,
    },
    DecodeMessage {
        queue: String,
        source: CodecError,
    },
    Sled(sled::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedEngine { engine } => write!(
                f,
                "unsupported storage.engine '{engine}'; allowed values: sled, memory"
            ),
            Self::InvalidSledMode { mode } => write!(
                f,
                "invalid storage.sled.mode '{mode}'; allowed values: low_space, high_throughput"
            ),
            Self::HomeDirectoryUnavailable => {
                write!(f, "cannot resolve storage path because HOME is not set")
            }
            Self::CreateDataDir { path, source } => write!(
                f,
                "failed to create storage data directory '{}': {source}",
                path.display()
            ),
            Self::SerializeDefinition(source) => {
                write!(f, "failed to serialize queue definition for storage: {source}")
            }
            Self::DeserializeDefinition(source) => {
                write!(f, "failed to deserialize queue definition from storage: {source}")
            }
            Self::EncodeMessage { queue, source } => {
                write!(f, "failed to encode backlog message of queue '{queue}': {source}")
            }
            Self::DecodeMessage { queue, source } => {
                write!(f, "failed to decode backlog message of queue '{queue}': {source}")
            }
            Self::Sled(source) => write!(f, "sled storage error: {source}"),
        }
    }
}

impl std::error::Error for StorageError {}
