use std::collections::BTreeMap;
use std::fmt;

/// Typed value stored in a message property bag, a map body or a stream body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    Str(String),
    Int(i32),
    Long(i64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl PropertyValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Bool(_) => "bool",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Long(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Bytes(value) => write!(f, "<{} bytes>", value.len()),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PropertyError {
    InvalidPropertyType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
}

impl fmt::Display for PropertyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPropertyType {
                key,
                expected,
                actual,
            } => write!(
                f,
                "property '{key}' holds a {actual} value, requested as {expected}"
            ),
        }
    }
}

impl std::error::Error for PropertyError {}

/// Ordered key/value bag. Plain getters report `Ok(None)` for a missing key and
/// fail only on a type mismatch; the `_or` getters never fail.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, PropertyValue>,
}

macro_rules! typed_getters {
    ($get:ident, $get_or:ident, $variant:ident, $ty:ty, $expected:literal) => {
        pub fn $get(&self, key: &str) -> Result<Option<$ty>, PropertyError> {
            match self.entries.get(key) {
                None => Ok(None),
                Some(PropertyValue::$variant(value)) => Ok(Some(value.clone())),
                Some(other) => Err(PropertyError::InvalidPropertyType {
                    key: key.to_owned(),
                    expected: $expected,
                    actual: other.type_name(),
                }),
            }
        }

        pub fn $get_or(&self, key: &str, default: $ty) -> $ty {
            self.$get(key).ok().flatten().unwrap_or(default)
        }
    };
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.entries.iter()
    }

    typed_getters!(string_property, string_property_or, Str, String, "string");
    typed_getters!(int_property, int_property_or, Int, i32, "int");
    typed_getters!(long_property, long_property_or, Long, i64, "long");
    typed_getters!(bool_property, bool_property_or, Bool, bool, "bool");
    typed_getters!(bytes_property, bytes_property_or, Bytes, Vec<u8>, "bytes");
}

impl FromIterator<(String, PropertyValue)> for Properties {
    fn from_iter<T: IntoIterator<Item = (String, PropertyValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
