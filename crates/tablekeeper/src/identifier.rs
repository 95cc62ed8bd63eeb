use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const SEPARATOR: char = '.';

/// Hierarchical namespace name, e.g. `["com", "org", "dept"]`.
///
/// Never empty, and no part is empty or contains `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct NamespaceIdent(Vec<String>);

fn validate_part(part: &str) -> Result<(), ValidationError> {
    if part.is_empty() {
        return Err(ValidationError::new(
            "Identifier parts must not be empty".to_string(),
        ));
    }
    if part.contains(SEPARATOR) {
        return Err(ValidationError::for_key(
            format!("Identifier part `{part}` must not contain `{SEPARATOR}`"),
            part,
        ));
    }
    Ok(())
}

impl NamespaceIdent {
    /// Single level namespace. Use [`NamespaceIdent::from_vec`] for untrusted input.
    pub fn new(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    pub fn from_vec(parts: Vec<String>) -> Result<Self, ValidationError> {
        if parts.is_empty() {
            return Err(ValidationError::new("Namespace must not be empty"));
        }
        for part in &parts {
            validate_part(part)?;
        }
        Ok(Self(parts))
    }

    pub fn from_strs<I, S>(parts: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_vec(parts.into_iter().map(Into::into).collect())
    }

    /// Parses `"a.b.c"` into `["a", "b", "c"]`.
    pub fn from_dotted(value: &str) -> Result<Self, ValidationError> {
        Self::from_strs(value.split(SEPARATOR))
    }

    #[must_use]
    pub fn parts(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn inner(self) -> Vec<String> {
        self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn parent(&self) -> Option<NamespaceIdent> {
        (self.0.len() > 1).then(|| Self(self.0[..self.0.len() - 1].to_vec()))
    }

    #[must_use]
    pub fn is_direct_child_of(&self, parent: &NamespaceIdent) -> bool {
        self.0.len() == parent.0.len() + 1 && self.0.starts_with(&parent.0)
    }

    /// Returns the namespace extended by one level.
    pub fn child(&self, name: impl Into<String>) -> Result<NamespaceIdent, ValidationError> {
        let name = name.into();
        validate_part(&name)?;
        let mut parts = self.0.clone();
        parts.push(name);
        Ok(Self(parts))
    }
}

impl Display for NamespaceIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl FromStr for NamespaceIdent {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_dotted(s)
    }
}

impl TryFrom<Vec<String>> for NamespaceIdent {
    type Error = ValidationError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::from_vec(value)
    }
}

impl From<NamespaceIdent> for Vec<String> {
    fn from(value: NamespaceIdent) -> Self {
        value.0
    }
}

impl AsRef<[String]> for NamespaceIdent {
    fn as_ref(&self) -> &[String] {
        &self.0
    }
}

/// A table name within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableIdent {
    pub namespace: NamespaceIdent,
    pub name: String,
}

impl TableIdent {
    pub fn new(namespace: NamespaceIdent, name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_part(&name)?;
        Ok(Self { namespace, name })
    }

    /// Builds an identifier from at least two segments; the last one is the table name.
    pub fn from_strs<I, S>(parts: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parts: Vec<String> = parts.into_iter().map(Into::into).collect();
        let Some(name) = parts.pop() else {
            return Err(ValidationError::new("Table identifier must not be empty"));
        };
        if parts.is_empty() {
            return Err(ValidationError::for_key(
                format!("Table identifier `{name}` must include a namespace"),
                name,
            ));
        }
        Self::new(NamespaceIdent::from_vec(parts)?, name)
    }

    #[must_use]
    pub fn namespace(&self) -> &NamespaceIdent {
        &self.namespace
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace parts followed by the table name.
    #[must_use]
    pub fn to_parts(&self) -> Vec<String> {
        let mut parts = self.namespace.parts().to_vec();
        parts.push(self.name.clone());
        parts
    }
}

impl Display for TableIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl FromStr for TableIdent {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_strs(s.split(SEPARATOR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_and_tuple_forms_are_equal() {
        let dotted: TableIdent = "a.b.c".parse().unwrap();
        let tuple = TableIdent::from_strs(["a", "b", "c"]).unwrap();
        assert_eq!(dotted, tuple);
        assert_eq!(dotted.namespace(), &NamespaceIdent::from_strs(["a", "b"]).unwrap());
        assert_eq!(dotted.name(), "c");
        assert_eq!(dotted.to_string(), "a.b.c");
    }

    #[test]
    fn test_namespace_validation() {
        assert!(NamespaceIdent::from_vec(vec![]).is_err());
        assert!(NamespaceIdent::from_strs(["a", ""]).is_err());
        let err = NamespaceIdent::from_strs(["a.b"]).unwrap_err();
        assert_eq!(err.key.as_deref(), Some("a.b"));
    }

    #[test]
    fn test_table_ident_requires_namespace() {
        let err = TableIdent::from_strs(["my_table"]).unwrap_err();
        assert_eq!(err.key.as_deref(), Some("my_table"));
        assert!("".parse::<TableIdent>().is_err());
    }

    #[test]
    fn test_namespace_hierarchy() {
        let parent = NamespaceIdent::from_dotted("com.org").unwrap();
        let child = parent.child("dept").unwrap();
        assert!(child.is_direct_child_of(&parent));
        assert!(!parent.is_direct_child_of(&child));
        assert_eq!(child.parent(), Some(parent));
        assert_eq!(NamespaceIdent::new("top").parent(), None);
    }

    #[test]
    fn test_namespace_serde_rejects_empty() {
        let ns: NamespaceIdent = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(ns.len(), 2);
        assert!(serde_json::from_str::<NamespaceIdent>("[]").is_err());
    }
}
