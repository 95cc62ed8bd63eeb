use std::fmt::{Display, Formatter};

/// Classification of storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum ErrorKind {
    /// Catch-all for errors that do not fit any other category.
    Unexpected,
    /// The object or prefix does not exist.
    NotFound,
    /// A write precondition did not hold, e.g. the object already exists.
    ConditionNotMatch,
    PermissionDenied,
    /// The location or backend configuration is not usable.
    ConfigInvalid,
    RequestTimeout,
    ServiceUnavailable,
    RateLimited,
    CredentialsExpired,
}

impl ErrorKind {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RequestTimeout | ErrorKind::ServiceUnavailable | ErrorKind::RateLimited
        )
    }
}

#[derive(Debug)]
pub struct IOError {
    kind: ErrorKind,
    reason: String,
    location: Option<String>,
    context: Vec<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl IOError {
    pub fn new(kind: ErrorKind, reason: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            location: Some(location.into()),
            context: Vec::new(),
            source: None,
        }
    }

    pub fn new_without_location(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            location: None,
            context: Vec::new(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    #[must_use]
    pub fn context(&self) -> &[String] {
        &self.context
    }

    #[must_use]
    pub fn into_source(self) -> Option<Box<dyn std::error::Error + Send + Sync + 'static>> {
        self.source
    }

    pub(crate) fn from_std_io(
        err: std::io::Error,
        action: &str,
        location: impl Into<String>,
    ) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::AlreadyExists => ErrorKind::ConditionNotMatch,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::TimedOut => ErrorKind::RequestTimeout,
            _ => ErrorKind::Unexpected,
        };
        Self::new(kind, format!("Failed to {action}"), location).with_source(err)
    }
}

impl Display for IOError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.reason, self.kind)?;
        if let Some(location) = &self.location {
            write!(f, " at `{location}`")?;
        }
        for context in &self.context {
            write!(f, "; {context}")?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for IOError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid location `{value}`: {reason}")]
pub struct InvalidLocationError {
    pub value: String,
    pub reason: String,
}

impl InvalidLocationError {
    pub fn new(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl From<InvalidLocationError> for IOError {
    fn from(err: InvalidLocationError) -> Self {
        let location = err.value.clone();
        IOError::new(ErrorKind::ConfigInvalid, err.reason.clone(), location).with_source(err)
    }
}
