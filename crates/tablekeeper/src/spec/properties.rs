use std::{collections::HashMap, str::FromStr};

use crate::error::ValidationError;

/// Creation-only property selecting the format version. Never persisted.
pub const PROPERTY_FORMAT_VERSION: &str = "format-version";
pub const PROPERTY_METADATA_PREVIOUS_VERSIONS_MAX: &str = "write.metadata.previous-versions-max";
pub const PROPERTY_METADATA_PREVIOUS_VERSIONS_MAX_DEFAULT: usize = 100;
pub const PROPERTY_METADATA_DELETE_AFTER_COMMIT_ENABLED: &str =
    "write.metadata.delete-after-commit.enabled";
pub const PROPERTY_METADATA_DELETE_AFTER_COMMIT_ENABLED_DEFAULT: bool = false;

/// Keys that describe table state and cannot be set as properties.
pub const RESERVED_PROPERTIES: [&str; 9] = [
    PROPERTY_FORMAT_VERSION,
    "uuid",
    "snapshot-count",
    "current-snapshot-summary",
    "current-snapshot-id",
    "current-snapshot-timestamp-ms",
    "current-schema",
    "default-partition-spec",
    "default-sort-order",
];

/// Typed property input. Values are stored as strings.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl PropertyValue {
    /// String form stored in metadata. `Null` is rejected with the offending key.
    pub fn into_property_string(self, key: &str) -> Result<String, ValidationError> {
        match self {
            PropertyValue::String(s) => Ok(s),
            PropertyValue::Int(i) => Ok(i.to_string()),
            PropertyValue::Float(f) => Ok(f.to_string()),
            PropertyValue::Bool(b) => Ok(b.to_string()),
            PropertyValue::Null => Err(ValidationError::for_key(
                format!("Null is not a supported value in properties: {key}"),
                key,
            )),
        }
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(PropertyValue::Null, Into::into)
    }
}

/// Stringifies typed properties, failing on the first null value.
pub fn stringify_properties<I, K>(properties: I) -> Result<HashMap<String, String>, ValidationError>
where
    I: IntoIterator<Item = (K, PropertyValue)>,
    K: Into<String>,
{
    let mut entries: Vec<(String, PropertyValue)> = properties
        .into_iter()
        .map(|(k, v)| (k.into(), v))
        .collect();
    // Deterministic error reporting when several values are null
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
        .into_iter()
        .map(|(key, value)| {
            let value = value.into_property_string(&key)?;
            Ok((key, value))
        })
        .collect()
}

/// Reads a typed property, falling back to `default` when absent or malformed.
pub(crate) fn property_or_default<T: FromStr>(
    properties: &HashMap<String, String>,
    key: &str,
    default: T,
) -> T {
    match properties.get(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring malformed table property {key}={raw}, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stringify_properties() {
        let props = stringify_properties([
            ("property_name", PropertyValue::from(42)),
            ("flag", PropertyValue::from(true)),
            ("s", PropertyValue::from("v")),
        ])
        .unwrap();
        assert_eq!(props["property_name"], "42");
        assert_eq!(props["flag"], "true");
        assert_eq!(props["s"], "v");
    }

    #[test]
    fn test_null_property_names_key() {
        let err = stringify_properties([
            ("ok", PropertyValue::from("v")),
            ("property_name", PropertyValue::from(None::<String>)),
        ])
        .unwrap_err();
        assert_eq!(
            err.message,
            "Null is not a supported value in properties: property_name"
        );
        assert_eq!(err.key.as_deref(), Some("property_name"));
    }

    #[test]
    fn test_property_or_default() {
        let props = HashMap::from([
            (PROPERTY_METADATA_PREVIOUS_VERSIONS_MAX.to_string(), "5".to_string()),
            ("bad".to_string(), "x".to_string()),
        ]);
        assert_eq!(
            property_or_default(&props, PROPERTY_METADATA_PREVIOUS_VERSIONS_MAX, 100usize),
            5
        );
        assert_eq!(property_or_default(&props, "bad", 3usize), 3);
        assert!(!property_or_default(
            &props,
            PROPERTY_METADATA_DELETE_AFTER_COMMIT_ENABLED,
            PROPERTY_METADATA_DELETE_AFTER_COMMIT_ENABLED_DEFAULT
        ));
    }
}
