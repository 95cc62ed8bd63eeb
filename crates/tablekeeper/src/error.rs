use std::{
    error::Error as StdError,
    fmt::{Display, Formatter},
};

use http::StatusCode;
use serde::{Deserialize, Serialize};
use tablekeeper_io::{ErrorKind as IOErrorKind, IOError};
use typed_builder::TypedBuilder;

use crate::identifier::{NamespaceIdent, TableIdent};

macro_rules! impl_error_stack_methods {
    ($error_type:ty) => {
        impl $error_type {
            #[must_use]
            pub fn append_detail(mut self, detail: impl Into<String>) -> Self {
                self.stack.push(detail.into());
                self
            }

            pub fn append_detail_mut(&mut self, detail: impl Into<String>) {
                self.stack.push(detail.into());
            }
        }
    };
}

macro_rules! impl_from_with_detail {
    ($from_type:ty => $to_type:ident::$variant:ident, $detail:expr) => {
        impl From<$from_type> for $to_type {
            fn from(err: $from_type) -> Self {
                $to_type::$variant(err.append_detail($detail))
            }
        }
    };
}

/// Per-operation error enum over the given kinds. Converting a kind into the
/// enum records `stack_message` on the kind's stack.
macro_rules! define_transparent_error {
    (
        $(#[$meta:meta])*
        $vis:vis enum $error_name:ident,
        stack_message: $stack_msg:expr,
        variants: [
            $($variant:ident),* $(,)?
        ]
    ) => {
        $(#[$meta])*
        #[derive(thiserror::Error, Debug)]
        $vis enum $error_name {
            $(
                #[error(transparent)]
                $variant($variant),
            )*
        }

        pastey::paste! {
            const [<$error_name:snake:upper _STACK>]: &str = $stack_msg;

            $(
                impl_from_with_detail!($variant => $error_name::$variant, [<$error_name:snake:upper _STACK>]);
            )*

            impl $error_name {
                #[must_use]
                pub fn append_detail(mut self, detail: impl Into<String>) -> Self {
                    match &mut self {
                        $(
                            $error_name::$variant(e) => {
                                e.append_detail_mut(detail);
                            }
                        )*
                    }
                    self
                }

                /// Context collected while the error propagated.
                #[must_use]
                pub fn stack(&self) -> &[String] {
                    match self {
                        $(
                            $error_name::$variant(e) => &e.stack,
                        )*
                    }
                }
            }

            impl From<$error_name> for ErrorModel {
                fn from(err: $error_name) -> Self {
                    match err {
                        $(
                            $error_name::$variant(e) => e.into(),
                        )*
                    }
                }
            }
        }
    };
}

macro_rules! define_namespace_err {
    ($error_name:ident, $error_message:literal, $code:expr) => {
        #[derive(thiserror::Error, Debug, PartialEq)]
        #[error($error_message)]
        pub struct $error_name {
            pub namespace: NamespaceIdent,
            pub stack: Vec<String>,
        }

        impl $error_name {
            #[must_use]
            pub fn new(namespace: NamespaceIdent) -> Self {
                Self {
                    namespace,
                    stack: Vec::new(),
                }
            }
        }

        impl_error_stack_methods!($error_name);

        impl From<$error_name> for ErrorModel {
            fn from(err: $error_name) -> Self {
                let message = err.to_string();
                ErrorModel {
                    r#type: stringify!($error_name).to_string(),
                    code: $code.as_u16(),
                    message,
                    stack: err.stack,
                    source: None,
                }
            }
        }
    };
}

macro_rules! define_table_err {
    ($error_name:ident, $error_message:literal, $code:expr) => {
        #[derive(thiserror::Error, Debug, PartialEq)]
        #[error($error_message)]
        pub struct $error_name {
            pub table: TableIdent,
            pub stack: Vec<String>,
        }

        impl $error_name {
            #[must_use]
            pub fn new(table: TableIdent) -> Self {
                Self {
                    table,
                    stack: Vec::new(),
                }
            }
        }

        impl_error_stack_methods!($error_name);

        impl From<$error_name> for ErrorModel {
            fn from(err: $error_name) -> Self {
                let message = err.to_string();
                ErrorModel {
                    r#type: stringify!($error_name).to_string(),
                    code: $code.as_u16(),
                    message,
                    stack: err.stack,
                    source: None,
                }
            }
        }
    };
}

/// Error payload carrying a status code, a machine readable type and propagated context.
#[derive(Default, Debug, TypedBuilder, Serialize, Deserialize)]
pub struct ErrorModel {
    /// Human-readable error message
    #[builder(setter(into))]
    pub message: String,
    /// Internal type definition of the error
    #[builder(setter(into))]
    pub r#type: String,
    /// HTTP-style status code
    pub code: u16,
    #[serde(skip)]
    #[builder(default)]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub stack: Vec<String>,
}

impl StdError for ErrorModel {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl Display for ErrorModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} ({}): {}", self.r#type, self.code, self.message)?;

        if !self.stack.is_empty() {
            writeln!(f, "Stack:")?;
            for detail in &self.stack {
                writeln!(f, "  {detail}")?;
            }
        }

        if let Some(source) = self.source.as_ref() {
            writeln!(f, "Caused by:")?;
            error_chain_fmt(&**source, f)?;
        }

        Ok(())
    }
}

pub(crate) fn error_chain_fmt(
    e: &(dyn StdError + 'static),
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{e}\n")?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{cause}")?;
        current = cause.source();
    }
    Ok(())
}

// --------------------------- NAMESPACE & TABLE ERRORS ---------------------------
define_namespace_err!(
    NoSuchNamespace,
    "Namespace does not exist: {namespace}",
    StatusCode::NOT_FOUND
);
define_namespace_err!(
    NamespaceAlreadyExists,
    "Namespace already exists: {namespace}",
    StatusCode::CONFLICT
);
define_namespace_err!(
    NamespaceNotEmpty,
    "Namespace is not empty: {namespace}",
    StatusCode::CONFLICT
);
define_table_err!(
    NoSuchTable,
    "Table does not exist: {table}",
    StatusCode::NOT_FOUND
);
define_table_err!(
    TableAlreadyExists,
    "Table already exists: {table}",
    StatusCode::CONFLICT
);

// --------------------------- COMMIT ERRORS ---------------------------
/// A table requirement did not hold against the live metadata.
#[derive(thiserror::Error, Debug, PartialEq)]
#[error("Requirement failed: {message}")]
pub struct RequirementFailed {
    pub message: String,
    pub table: Option<TableIdent>,
    pub stack: Vec<String>,
}
impl_error_stack_methods!(RequirementFailed);

impl RequirementFailed {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            table: None,
            stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_table(mut self, table: TableIdent) -> Self {
        self.table = Some(table);
        self
    }
}

impl From<RequirementFailed> for ErrorModel {
    fn from(err: RequirementFailed) -> Self {
        let message = match &err.table {
            Some(table) => format!("{err} (table {table})"),
            None => err.to_string(),
        };
        ErrorModel {
            r#type: "RequirementFailed".to_string(),
            code: StatusCode::CONFLICT.as_u16(),
            message,
            stack: err.stack,
            source: None,
        }
    }
}

/// The pointer of a table moved between validation and the atomic swap.
#[derive(thiserror::Error, Debug, PartialEq)]
#[error(
    "Commit conflict on table {table}: expected current metadata `{expected_metadata_location}`, pointer has moved"
)]
pub struct CommitConflict {
    pub table: TableIdent,
    pub expected_metadata_location: String,
    pub stack: Vec<String>,
}
impl_error_stack_methods!(CommitConflict);

impl CommitConflict {
    pub fn new(table: TableIdent, expected_metadata_location: impl Into<String>) -> Self {
        Self {
            table,
            expected_metadata_location: expected_metadata_location.into(),
            stack: Vec::new(),
        }
    }
}

impl From<CommitConflict> for ErrorModel {
    fn from(err: CommitConflict) -> Self {
        let message = err.to_string();
        ErrorModel {
            r#type: "CommitConflict".to_string(),
            code: StatusCode::CONFLICT.as_u16(),
            message,
            stack: err.stack,
            source: None,
        }
    }
}

// --------------------------- VALIDATION ---------------------------
/// Malformed input to metadata construction or evolution.
#[derive(thiserror::Error, Debug, PartialEq, Clone)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    /// Offending key, field name or id, if any.
    pub key: Option<String>,
    pub stack: Vec<String>,
}
impl_error_stack_methods!(ValidationError);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            key: None,
            stack: Vec::new(),
        }
    }

    pub fn for_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            key: Some(key.into()),
            stack: Vec::new(),
        }
    }
}

impl From<ValidationError> for ErrorModel {
    fn from(err: ValidationError) -> Self {
        ErrorModel {
            r#type: "ValidationError".to_string(),
            code: StatusCode::BAD_REQUEST.as_u16(),
            message: err.message,
            stack: err.stack,
            source: None,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("{message}")]
pub struct CatalogConfigurationError {
    pub message: String,
    pub stack: Vec<String>,
}
impl_error_stack_methods!(CatalogConfigurationError);

impl CatalogConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Vec::new(),
        }
    }
}

impl From<CatalogConfigurationError> for ErrorModel {
    fn from(err: CatalogConfigurationError) -> Self {
        ErrorModel {
            r#type: "CatalogConfigurationError".to_string(),
            code: StatusCode::BAD_REQUEST.as_u16(),
            message: err.message,
            stack: err.stack,
            source: None,
        }
    }
}

// --------------------------- IO & SERIALIZATION ---------------------------
#[derive(thiserror::Error, Debug)]
#[error("Storage error: {source}")]
pub struct StorageError {
    pub source: IOError,
    pub stack: Vec<String>,
}
impl_error_stack_methods!(StorageError);

impl StorageError {
    #[must_use]
    pub fn new(source: IOError) -> Self {
        Self {
            source,
            stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> IOErrorKind {
        self.source.kind()
    }
}

impl From<IOError> for StorageError {
    fn from(source: IOError) -> Self {
        Self::new(source)
    }
}

impl From<StorageError> for ErrorModel {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        let code = match err.source.kind() {
            IOErrorKind::NotFound => StatusCode::NOT_FOUND,
            IOErrorKind::ConditionNotMatch => StatusCode::CONFLICT,
            IOErrorKind::PermissionDenied | IOErrorKind::CredentialsExpired => {
                StatusCode::FORBIDDEN
            }
            IOErrorKind::ConfigInvalid => StatusCode::BAD_REQUEST,
            IOErrorKind::RequestTimeout
            | IOErrorKind::ServiceUnavailable
            | IOErrorKind::RateLimited => StatusCode::SERVICE_UNAVAILABLE,
            IOErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ErrorModel {
            r#type: "StorageError".to_string(),
            code: code.as_u16(),
            message,
            stack: err.stack,
            source: Some(Box::new(err.source)),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("Failed to (de)serialize table metadata at `{location}`: {source}")]
pub struct SerializationError {
    pub location: String,
    pub source: serde_json::Error,
    pub stack: Vec<String>,
}
impl_error_stack_methods!(SerializationError);

impl SerializationError {
    pub fn new(location: impl Into<String>, source: serde_json::Error) -> Self {
        Self {
            location: location.into(),
            source,
            stack: Vec::new(),
        }
    }
}

impl From<SerializationError> for ErrorModel {
    fn from(err: SerializationError) -> Self {
        let message = err.to_string();
        ErrorModel {
            r#type: "SerializationError".to_string(),
            code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            message,
            stack: err.stack,
            source: Some(Box::new(err.source)),
        }
    }
}

// --------------------------- BACKEND ---------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum CatalogBackendErrorType {
    Unexpected,
    ConcurrentModification,
}

#[derive(Debug)]
pub struct CatalogBackendError {
    pub r#type: CatalogBackendErrorType,
    pub stack: Vec<String>,
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl_error_stack_methods!(CatalogBackendError);

impl CatalogBackendError {
    pub fn new<E>(source: E, r#type: impl Into<CatalogBackendErrorType>) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            r#type: r#type.into(),
            stack: Vec::new(),
            source: Box::new(source),
        }
    }

    pub fn new_unexpected<E>(source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::new(source, CatalogBackendErrorType::Unexpected)
    }
}

impl StdError for CatalogBackendError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.source as &(dyn StdError + 'static))
    }
}

impl Display for CatalogBackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "CatalogBackendError ({}): {}", self.r#type, self.source)?;

        if !self.stack.is_empty() {
            writeln!(f, "Stack:")?;
            for detail in &self.stack {
                writeln!(f, "  {detail}")?;
            }
        }

        if let Some(source) = self.source.source() {
            writeln!(f, "Caused by:")?;
            error_chain_fmt(source, f)?;
        }

        Ok(())
    }
}

impl From<CatalogBackendError> for ErrorModel {
    fn from(err: CatalogBackendError) -> Self {
        let CatalogBackendError {
            r#type,
            stack,
            source,
        } = err;

        let code = match r#type {
            CatalogBackendErrorType::Unexpected => StatusCode::SERVICE_UNAVAILABLE,
            CatalogBackendErrorType::ConcurrentModification => StatusCode::CONFLICT,
        }
        .as_u16();

        ErrorModel {
            r#type: "CatalogBackendError".to_string(),
            code,
            message: format!("Catalog backend error ({type}): {source}"),
            stack,
            source: None,
        }
    }
}

// --------------------------- OPERATION ERRORS ---------------------------
define_transparent_error! {
    pub enum CreateNamespaceError,
    stack_message: "Error creating namespace",
    variants: [
        NamespaceAlreadyExists,
        ValidationError,
        CatalogBackendError,
    ]
}

define_transparent_error! {
    pub enum DropNamespaceError,
    stack_message: "Error dropping namespace",
    variants: [
        NoSuchNamespace,
        NamespaceNotEmpty,
        CatalogBackendError,
    ]
}

define_transparent_error! {
    /// Errors of namespace reads, listings and property updates.
    pub enum NamespaceOpError,
    stack_message: "Error accessing namespace",
    variants: [
        NoSuchNamespace,
        ValidationError,
        CatalogBackendError,
    ]
}

define_transparent_error! {
    /// Errors of `create_table` and `register_table`.
    pub enum CreateTableError,
    stack_message: "Error creating table",
    variants: [
        TableAlreadyExists,
        ValidationError,
        StorageError,
        SerializationError,
        CatalogBackendError,
    ]
}

define_transparent_error! {
    pub enum LoadTableError,
    stack_message: "Error loading table",
    variants: [
        NoSuchTable,
        StorageError,
        SerializationError,
        CatalogBackendError,
    ]
}

define_transparent_error! {
    pub enum DropTableError,
    stack_message: "Error dropping table",
    variants: [
        NoSuchTable,
        StorageError,
        SerializationError,
        CatalogBackendError,
    ]
}

define_transparent_error! {
    pub enum RenameTableError,
    stack_message: "Error renaming table",
    variants: [
        NoSuchTable,
        TableAlreadyExists,
        StorageError,
        SerializationError,
        CatalogBackendError,
    ]
}

define_transparent_error! {
    pub enum CommitTableError,
    stack_message: "Error committing table changes",
    variants: [
        NoSuchTable,
        RequirementFailed,
        ValidationError,
        CommitConflict,
        StorageError,
        SerializationError,
        CatalogBackendError,
    ]
}

define_transparent_error! {
    pub enum LoadCatalogError,
    stack_message: "Error loading catalog",
    variants: [
        CatalogConfigurationError,
        StorageError,
        CatalogBackendError,
    ]
}

impl From<LoadTableError> for CommitTableError {
    fn from(err: LoadTableError) -> Self {
        match err {
            LoadTableError::NoSuchTable(e) => e.into(),
            LoadTableError::StorageError(e) => e.into(),
            LoadTableError::SerializationError(e) => e.into(),
            LoadTableError::CatalogBackendError(e) => e.into(),
        }
    }
}

impl From<LoadTableError> for RenameTableError {
    fn from(err: LoadTableError) -> Self {
        match err {
            LoadTableError::NoSuchTable(e) => e.into(),
            LoadTableError::StorageError(e) => e.into(),
            LoadTableError::SerializationError(e) => e.into(),
            LoadTableError::CatalogBackendError(e) => e.into(),
        }
    }
}

impl CommitTableError {
    /// Whether re-reading the table and recomputing the commit may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CommitTableError::CommitConflict(_) | CommitTableError::RequirementFailed(_)
        ) || matches!(
            self,
            CommitTableError::CatalogBackendError(CatalogBackendError {
                r#type: CatalogBackendErrorType::ConcurrentModification,
                ..
            })
        )
    }
}
