use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use toml::Value;

pub const CONFIG_ENV_VAR: &str = "KASMQ_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "kasmq.toml";

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub queues: QueuesConfig,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub human_friendly: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            human_friendly: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Administrative switch; a disabled server answers every request with FAIL.
    pub enabled: bool,
    pub max_connections: usize,
    pub read_poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 14560,
            enabled: true,
            max_connections: 1024,
            read_poll_interval_ms: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueuesConfig {
    pub default_threshold: usize,
    pub default_poll_interval_ms: u64,
    pub min_poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    /// Upper bound for a single GET wait. Zero leaves indefinite waits allowed.
    pub max_get_timeout_ms: u64,
    pub janitor_interval_ms: u64,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            default_threshold: 10_000,
            default_poll_interval_ms: 100,
            min_poll_interval_ms: 10,
            max_poll_interval_ms: 5_000,
            max_get_timeout_ms: 0,
            janitor_interval_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub engine: String,
    pub path: String,
    pub sled: SledConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            engine: "sled".to_owned(),
            path: "~/.kasmq/data".to_owned(),
            sled: SledConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SledConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_capacity: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SecurityConfig {
    pub enabled: bool,
    pub users: Vec<UserConfig>,
    pub groups: Vec<GroupConfig>,
    pub aces: Vec<AceConfig>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            users: vec![UserConfig {
                name: "admin".to_owned(),
                password: "admin".to_owned(),
                groups: vec!["ADMINS".to_owned()],
            }],
            groups: vec![GroupConfig {
                name: "ADMINS".to_owned(),
                description: Some("full access".to_owned()),
            }],
            aces: vec![
                AceConfig {
                    resource_class: "command".to_owned(),
                    pattern: "*".to_owned(),
                    group: "ADMINS".to_owned(),
                    access: vec!["all".to_owned()],
                },
                AceConfig {
                    resource_class: "queue".to_owned(),
                    pattern: "*".to_owned(),
                    group: "ADMINS".to_owned(),
                    access: vec!["all".to_owned()],
                },
            ],
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserConfig {
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct AceConfig {
    pub resource_class: String,
    pub pattern: String,
    pub group: String,
    pub access: Vec<String>,
}

impl AppConfig {
    /// Resolves the config file (`--config <path>`, then `$KASMQ_CONFIG`, then
    /// `./kasmq.toml`), falling back to built-in defaults when none exists, and
    /// applies the remaining `--section.key value` overrides.
    pub fn load_with_discovery(args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        let (explicit_path, remaining) = split_config_arg(args)?;

        let path = explicit_path
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
            .or_else(|| {
                let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
                candidate.exists().then_some(candidate)
            });

        match path {
            Some(path) => Self::load_from_toml_with_args(path, remaining),
            None => Self::defaults_with_args(remaining),
        }
    }

    pub fn load_from_toml_with_args(
        path: impl AsRef<Path>,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let path_label = path.as_ref().to_string_lossy().to_string();
        let toml_content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path_label.clone(),
            source,
        })?;

        let parsed: Self = toml::from_str(&toml_content).map_err(|source| ConfigError::TomlParse {
            path: path_label,
            source,
        })?;

        Self::apply_overrides(parsed, args)
    }

    pub fn defaults_with_args(args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        Self::apply_overrides(Self::default(), args)
    }

    // Overrides are applied on the fully defaulted tree so every known key can be targeted.
    fn apply_overrides(base: Self, args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        let overrides = parse_cli_overrides(args)?;
        if overrides.is_empty() {
            return Ok(base);
        }

        let mut root_value = Value::try_from(&base).map_err(ConfigError::Serialize)?;
        for (key_path, raw_value) in overrides {
            apply_override(&mut root_value, &key_path, &raw_value)?;
        }

        root_value.try_into().map_err(ConfigError::Deserialize)
    }

    /// Flat `section.key = value` view used by configuration queries. Arrays of
    /// tables (users, groups, ACEs) are summarized by their element count so
    /// credentials never leave the process.
    pub fn flattened(&self) -> Vec<(String, String)> {
        let mut entries = Vec::new();
        if let Ok(root) = Value::try_from(self) {
            flatten_value("", &root, &mut entries);
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

fn flatten_value(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Table(table) => {
            for (key, nested) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_value(&path, nested, out);
            }
        }
        Value::Array(items) if items.iter().any(Value::is_table) => {
            out.push((prefix.to_owned(), format!("[{} entries]", items.len())));
        }
        Value::String(text) => out.push((prefix.to_owned(), text.clone())),
        other => out.push((prefix.to_owned(), other.to_string())),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    TomlParse {
        path: String,
        source: toml::de::Error,
    },
    Serialize(toml::ser::Error),
    Deserialize(toml::de::Error),
    MissingValueForArg {
        key: String,
    },
    InvalidArgFormat {
        arg: String,
    },
    InvalidPath {
        key: String,
    },
    UnknownPath {
        key: String,
    },
    UnsupportedOverrideType {
        key: String,
    },
    InvalidValueForType {
        key: String,
        expected: &'static str,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config file '{path}': {source}")
            }
            Self::TomlParse { path, source } => {
                write!(f, "failed to parse TOML config '{path}': {source}")
            }
            Self::Serialize(source) => write!(f, "failed to render config defaults: {source}"),
            Self::Deserialize(source) => write!(f, "failed to deserialize config: {source}"),
            Self::MissingValueForArg { key } => {
                write!(f, "missing value for CLI override '--{key}'")
            }
            Self::InvalidArgFormat { arg } => write!(
                f,
                "invalid CLI argument format '{arg}', expected '--section.key value'"
            ),
            Self::InvalidPath { key } => write!(f, "invalid override key path '{key}'"),
            Self::UnknownPath { key } => write!(f, "unknown override key path '{key}'"),
            Self::UnsupportedOverrideType { key } => {
                write!(f, "override not supported for complex TOML type at '{key}'")
            }
            Self::InvalidValueForType {
                key,
                expected,
                value,
            } => write!(
                f,
                "invalid value '{value}' for '{key}', expected type {expected}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

fn split_config_arg(
    args: impl IntoIterator<Item = String>,
) -> Result<(Option<PathBuf>, Vec<String>), ConfigError> {
    let mut path = None;
    let mut remaining = Vec::new();
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let value = iter.next().ok_or_else(|| ConfigError::MissingValueForArg {
                key: "config".to_owned(),
            })?;
            path = Some(PathBuf::from(value));
            continue;
        }
        remaining.push(arg);
    }

    Ok((path, remaining))
}

fn parse_cli_overrides(args: impl IntoIterator<Item = String>) -> Result<Vec<(String, String)>, ConfigError> {
    let mut parsed = Vec::new();
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        let Some(key) = arg.strip_prefix("--").filter(|key| !key.is_empty()) else {
            return Err(ConfigError::InvalidArgFormat { arg });
        };

        let value = iter.next().ok_or_else(|| ConfigError::MissingValueForArg {
            key: key.to_owned(),
        })?;
        parsed.push((key.to_owned(), value));
    }

    Ok(parsed)
}

fn apply_override(root: &mut Value, key_path: &str, raw_value: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = key_path.split('.').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(ConfigError::InvalidPath {
            key: key_path.to_owned(),
        });
    }
    let unknown = || ConfigError::UnknownPath {
        key: key_path.to_owned(),
    };

    let (final_key, sections) = parts.split_last().ok_or_else(unknown)?;
    let mut current = root;
    for section in sections {
        current = current
            .as_table_mut()
            .and_then(|table| table.get_mut(*section))
            .ok_or_else(unknown)?;
    }

    let current_value = current
        .as_table_mut()
        .and_then(|table| table.get_mut(*final_key))
        .ok_or_else(unknown)?;

    *current_value = parse_value_using_current_type(key_path, raw_value, current_value)?;
    Ok(())
}

fn parse_value_using_current_type(
    key_path: &str,
    raw_value: &str,
    current_value: &Value,
) -> Result<Value, ConfigError> {
    let invalid = |expected: &'static str| ConfigError::InvalidValueForType {
        key: key_path.to_owned(),
        expected,
        value: raw_value.to_owned(),
    };

    match current_value {
        Value::String(_) => Ok(Value::String(raw_value.to_owned())),
        Value::Integer(_) => raw_value
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| invalid("integer")),
        Value::Float(_) => raw_value
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| invalid("float")),
        Value::Boolean(_) => raw_value
            .parse::<bool>()
            .map(Value::Boolean)
            .map_err(|_| invalid("boolean")),
        Value::Datetime(_) | Value::Array(_) | Value::Table(_) => {
            Err(ConfigError::UnsupportedOverrideType {
                key: key_path.to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::{AppConfig, ConfigError};

    fn write_temp_config(content: &str, suffix: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "kasmq-config-test-{suffix}-{}.toml",
            std::process::id()
        ));
        fs::write(&path, content).expect("failed to write temp config");
        path
    }

    #[test]
    fn partial_file_is_completed_with_defaults() {
        let path = write_temp_config(
            r#"
[logging]
level = "debug"

[queues]
default_threshold = 25
"#,
            "partial",
        );

        let config = AppConfig::load_from_toml_with_args(&path, Vec::<String>::new())
            .expect("config should load");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.human_friendly);
        assert_eq!(config.queues.default_threshold, 25);
        assert_eq!(config.server.port, 14560);
        assert!(config.server.enabled);
        assert_eq!(config.security.users[0].name, "admin");
    }

    #[test]
    fn argv_overrides_matching_paths() {
        let path = write_temp_config(
            r#"
[server]
port = 9000
enabled = true
"#,
            "override",
        );

        let config = AppConfig::load_from_toml_with_args(
            &path,
            vec![
                "--server.port".to_owned(),
                "9100".to_owned(),
                "--server.enabled".to_owned(),
                "false".to_owned(),
                "--storage.engine".to_owned(),
                "memory".to_owned(),
            ],
        )
        .expect("config with overrides should load");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert_eq!(config.server.port, 9100);
        assert!(!config.server.enabled);
        assert_eq!(config.storage.engine, "memory");
    }

    #[test]
    fn rejects_unknown_and_mistyped_overrides() {
        let err = AppConfig::defaults_with_args(vec!["--server.nope".to_owned(), "x".to_owned()])
            .expect_err("unknown override key should fail");
        assert!(matches!(err, ConfigError::UnknownPath { .. }));

        let err = AppConfig::defaults_with_args(vec!["--server.port".to_owned(), "abc".to_owned()])
            .expect_err("non-numeric port should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValueForType {
                expected: "integer",
                ..
            }
        ));

        let err = AppConfig::defaults_with_args(vec!["--security.users".to_owned(), "x".to_owned()])
            .expect_err("arrays cannot be overridden");
        assert!(matches!(err, ConfigError::UnsupportedOverrideType { .. }));
    }

    #[test]
    fn discovery_honours_explicit_config_argument() {
        let path = write_temp_config(
            r#"
[server]
max_connections = 3
"#,
            "discovery",
        );

        let config = AppConfig::load_with_discovery(vec![
            "--config".to_owned(),
            path.to_string_lossy().to_string(),
            "--logging.level".to_owned(),
            "warn".to_owned(),
        ])
        .expect("discovered config should load");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert_eq!(config.server.max_connections, 3);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn flattened_view_masks_passwords_and_summarizes_tables() {
        let flat = AppConfig::default().flattened();

        let lookup = |key: &str| {
            flat.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(lookup("server.port").as_deref(), Some("14560"));
        assert_eq!(lookup("security.users").as_deref(), Some("[1 entries]"));
        assert!(flat.iter().all(|(k, _)| !k.contains("password")));
        assert!(flat.windows(2).all(|pair| pair[0].0 <= pair[1].0));
    }
}
