use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;

use crate::config::SecurityConfig;
use crate::utils::pattern::NamePattern;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    Command,
    Queue,
    User,
    Group,
}

impl ResourceClass {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "command" => Some(Self::Command),
            "queue" => Some(Self::Queue),
            "user" => Some(Self::User),
            "group" => Some(Self::Group),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Command => "COMMAND",
            Self::Queue => "QUEUE",
            Self::User => "USER",
            Self::Group => "GROUP",
        }
    }
}

/// Bitmask of granted or required access.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccessLevel(u8);

impl AccessLevel {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(0b0001);
    pub const WRITE: Self = Self(0b0010);
    pub const ALTER: Self = Self(0b0100);
    pub const EXECUTE: Self = Self(0b1000);
    pub const ALL: Self = Self(0b1111);

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::NONE),
            "read" => Some(Self::READ),
            "write" => Some(Self::WRITE),
            "alter" => Some(Self::ALTER),
            "execute" => Some(Self::EXECUTE),
            "all" => Some(Self::ALL),
            _ => None,
        }
    }

    pub fn contains(self, required: Self) -> bool {
        self.0 & required.0 == required.0
    }
}

impl BitOr for AccessLevel {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::READ, "READ"),
            (Self::WRITE, "WRITE"),
            (Self::ALTER, "ALTER"),
            (Self::EXECUTE, "EXECUTE"),
        ]
        .into_iter()
        .filter(|(level, _)| self.contains(*level))
        .map(|(_, name)| name)
        .collect::<Vec<_>>();

        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserEntity {
    pub name: String,
    pub groups: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupEntity {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessControlEntry {
    pub resource_class: ResourceClass,
    pub pattern: NamePattern,
    pub grants: HashMap<String, AccessLevel>,
}

/// Credential and permission lookups the request processors depend on.
pub trait AccessControl: Send + Sync {
    fn authenticate(&self, user: &str, password: &str) -> Option<UserEntity>;
    fn is_access_permitted(
        &self,
        user: &UserEntity,
        resource_class: ResourceClass,
        resource_name: &str,
        level: AccessLevel,
    ) -> bool;
    fn users(&self) -> Vec<UserEntity>;
    fn groups(&self) -> Vec<GroupEntity>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum SecurityError {
    UnknownResourceClass { value: String },
    UnknownAccessLevel { value: String },
    InvalidPattern { pattern: String },
    DuplicateUser { name: String },
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownResourceClass { value } => write!(
                f,
                "unknown security.aces resource_class '{value}'; allowed values: command, queue, user, group"
            ),
            Self::UnknownAccessLevel { value } => write!(
                f,
                "unknown security.aces access '{value}'; allowed values: none, read, write, alter, execute, all"
            ),
            Self::InvalidPattern { pattern } => write!(
                f,
                "invalid security.aces pattern '{pattern}'; use an exact name, 'prefix*' or '*'"
            ),
            Self::DuplicateUser { name } => write!(f, "security.users defines '{name}' twice"),
        }
    }
}

impl std::error::Error for SecurityError {}

struct StoredUser {
    password: String,
    entity: UserEntity,
}

/// Users, groups and ACEs taken from the `[security]` config section. With
/// `enabled = false` any non-empty user name logs in and everything is
/// permitted.
pub struct ConfigSecurityStore {
    enabled: bool,
    users: HashMap<String, StoredUser>,
    groups: Vec<GroupEntity>,
    aces: Vec<AccessControlEntry>,
}

impl ConfigSecurityStore {
    pub fn from_config(config: &SecurityConfig) -> Result<Self, SecurityError> {
        let mut users = HashMap::new();
        for user in &config.users {
            let entity = UserEntity {
                name: user.name.clone(),
                groups: user.groups.iter().map(|group| group.to_ascii_uppercase()).collect(),
            };
            let stored = StoredUser {
                password: user.password.clone(),
                entity,
            };
            if users.insert(user.name.to_ascii_lowercase(), stored).is_some() {
                return Err(SecurityError::DuplicateUser {
                    name: user.name.clone(),
                });
            }
        }

        let groups = config
            .groups
            .iter()
            .map(|group| GroupEntity {
                name: group.name.to_ascii_uppercase(),
                description: group.description.clone(),
            })
            .collect();

        let mut aces: Vec<AccessControlEntry> = Vec::new();
        for ace in &config.aces {
            let resource_class = ResourceClass::parse(&ace.resource_class).ok_or_else(|| {
                SecurityError::UnknownResourceClass {
                    value: ace.resource_class.clone(),
                }
            })?;
            let pattern =
                NamePattern::parse(&ace.pattern).ok_or_else(|| SecurityError::InvalidPattern {
                    pattern: ace.pattern.clone(),
                })?;
            let mut level = AccessLevel::NONE;
            for raw in &ace.access {
                level = level
                    | AccessLevel::parse(raw)
                        .ok_or_else(|| SecurityError::UnknownAccessLevel { value: raw.clone() })?;
            }

            let group = ace.group.to_ascii_uppercase();
            match aces
                .iter_mut()
                .find(|entry| entry.resource_class == resource_class && entry.pattern == pattern)
            {
                Some(entry) => {
                    let granted = entry.grants.entry(group).or_default();
                    *granted = *granted | level;
                }
                None => aces.push(AccessControlEntry {
                    resource_class,
                    pattern,
                    grants: HashMap::from([(group, level)]),
                }),
            }
        }

        Ok(Self {
            enabled: config.enabled,
            users,
            groups,
            aces,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn aces(&self) -> &[AccessControlEntry] {
        &self.aces
    }
}

impl AccessControl for ConfigSecurityStore {
    fn authenticate(&self, user: &str, password: &str) -> Option<UserEntity> {
        if user.trim().is_empty() {
            return None;
        }
        if !self.enabled {
            return Some(UserEntity {
                name: user.to_owned(),
                groups: Vec::new(),
            });
        }

        let stored = self.users.get(&user.to_ascii_lowercase())?;
        (stored.password == password).then(|| stored.entity.clone())
    }

    fn is_access_permitted(
        &self,
        user: &UserEntity,
        resource_class: ResourceClass,
        resource_name: &str,
        level: AccessLevel,
    ) -> bool {
        if !self.enabled {
            return true;
        }

        self.aces
            .iter()
            .filter(|ace| ace.resource_class == resource_class && ace.pattern.matches(resource_name))
            .any(|ace| {
                user.groups.iter().any(|group| {
                    ace.grants
                        .get(group)
                        .is_some_and(|granted| granted.contains(level))
                })
            })
    }

    fn users(&self) -> Vec<UserEntity> {
        let mut users = self
            .users
            .values()
            .map(|stored| stored.entity.clone())
            .collect::<Vec<_>>();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        users
    }

    fn groups(&self) -> Vec<GroupEntity> {
        let mut groups = self.groups.clone();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        groups
    }
}
