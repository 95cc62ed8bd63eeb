use std::{fmt::Display, str::FromStr};

use url::Url;

use crate::InvalidLocationError;

/// An absolute storage location, always represented as a URL.
///
/// Absolute filesystem paths are accepted on parse and converted to `file://` URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location(Url);

impl Location {
    pub fn parse_value(value: &str) -> Result<Self, InvalidLocationError> {
        match Url::parse(value) {
            Ok(url) => Ok(Self(url)),
            Err(url::ParseError::RelativeUrlWithoutBase) if value.starts_with('/') => {
                Url::from_file_path(value).map(Self).map_err(|()| {
                    InvalidLocationError::new(value, "Path cannot be converted to a file URL")
                })
            }
            Err(e) => Err(InvalidLocationError::new(value, e.to_string())),
        }
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.0
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    /// Appends `segment` to the path, inserting exactly one `/` between.
    pub fn push(&mut self, segment: &str) -> &mut Self {
        let path = self.0.path().trim_end_matches('/').to_string();
        let segment = segment.trim_matches('/');
        self.0.set_path(&format!("{path}/{segment}"));
        self
    }

    #[must_use]
    pub fn cloning_push(&self, segment: &str) -> Self {
        let mut location = self.clone();
        location.push(segment);
        location
    }

    pub fn without_trailing_slash(&mut self) -> &mut Self {
        let path = self.0.path().trim_end_matches('/').to_string();
        self.0.set_path(&path);
        self
    }

    pub fn with_trailing_slash(&mut self) -> &mut Self {
        if !self.0.path().ends_with('/') {
            let path = format!("{}/", self.0.path());
            self.0.set_path(&path);
        }
        self
    }

    /// Final path segment, if any.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.0.path().rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// Whether `self` equals `other` or lies below it.
    #[must_use]
    pub fn is_sublocation_of(&self, other: &Location) -> bool {
        let mut prefix = other.clone();
        prefix.with_trailing_slash();
        let mut this = self.clone();
        this.without_trailing_slash();
        let mut other_trimmed = other.clone();
        other_trimmed.without_trailing_slash();
        this == other_trimmed || self.as_str().starts_with(prefix.as_str())
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Location {
    type Err = InvalidLocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_value(s)
    }
}

impl From<Url> for Location {
    fn from(url: Url) -> Self {
        Self(url)
    }
}

impl AsRef<str> for Location {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
