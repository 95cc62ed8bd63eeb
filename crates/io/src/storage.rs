use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{ErrorKind, IOError, Location};

/// Condition a write must satisfy to take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePrecondition {
    /// Overwrite unconditionally.
    #[default]
    None,
    /// Fail with [`ErrorKind::ConditionNotMatch`] if the object already exists.
    DoesNotExist,
}

#[async_trait]
pub trait Storage: Debug + Send + Sync {
    async fn write(
        &self,
        location: &Location,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<(), IOError>;

    /// Fails with [`ErrorKind::NotFound`] if the object does not exist.
    async fn read(&self, location: &Location) -> Result<Bytes, IOError>;

    async fn exists(&self, location: &Location) -> Result<bool, IOError>;

    /// Deleting an absent object succeeds.
    async fn delete(&self, location: &Location) -> Result<(), IOError>;

    /// Deletes every object at or below `prefix`.
    async fn remove_all(&self, prefix: &Location) -> Result<(), IOError>;

    /// Lists all objects below `prefix`, in lexicographic order.
    async fn list(&self, prefix: &Location) -> Result<Vec<Location>, IOError>;
}

/// Statically dispatched storage backend, selected by location scheme.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    #[cfg(feature = "storage-in-memory")]
    Memory(crate::InMemoryStorage),
    #[cfg(feature = "storage-local")]
    Local(crate::LocalStorage),
}

impl StorageBackend {
    /// Picks a backend for `location`. In-memory backends are always fresh and
    /// must be shared by cloning the returned value.
    pub fn for_location(location: &Location) -> Result<Self, IOError> {
        match location.scheme() {
            #[cfg(feature = "storage-in-memory")]
            "memory" => Ok(Self::Memory(crate::InMemoryStorage::new())),
            #[cfg(feature = "storage-local")]
            "file" => Ok(Self::Local(crate::LocalStorage::new())),
            other => Err(IOError::new(
                ErrorKind::ConfigInvalid,
                format!("No storage backend available for scheme `{other}`"),
                location.as_str(),
            )),
        }
    }

    fn inner(&self) -> &dyn Storage {
        match self {
            #[cfg(feature = "storage-in-memory")]
            Self::Memory(storage) => storage,
            #[cfg(feature = "storage-local")]
            Self::Local(storage) => storage,
        }
    }
}

#[cfg(feature = "storage-in-memory")]
impl From<crate::InMemoryStorage> for StorageBackend {
    fn from(storage: crate::InMemoryStorage) -> Self {
        Self::Memory(storage)
    }
}

#[cfg(feature = "storage-local")]
impl From<crate::LocalStorage> for StorageBackend {
    fn from(storage: crate::LocalStorage) -> Self {
        Self::Local(storage)
    }
}

#[async_trait]
impl Storage for StorageBackend {
    async fn write(
        &self,
        location: &Location,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<(), IOError> {
        self.inner().write(location, data, precondition).await
    }

    async fn read(&self, location: &Location) -> Result<Bytes, IOError> {
        self.inner().read(location).await
    }

    async fn exists(&self, location: &Location) -> Result<bool, IOError> {
        self.inner().exists(location).await
    }

    async fn delete(&self, location: &Location) -> Result<(), IOError> {
        self.inner().delete(location).await
    }

    async fn remove_all(&self, prefix: &Location) -> Result<(), IOError> {
        self.inner().remove_all(prefix).await
    }

    async fn list(&self, prefix: &Location) -> Result<Vec<Location>, IOError> {
        self.inner().list(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_location_rejects_unknown_scheme() {
        let location = Location::parse_value("s3://bucket/key").unwrap();
        let err = StorageBackend::for_location(&location).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(err.location(), Some("s3://bucket/key"));
    }

    #[cfg(feature = "storage-in-memory")]
    #[test]
    fn test_for_location_memory() {
        let location = Location::parse_value("memory://warehouse").unwrap();
        let backend = StorageBackend::for_location(&location).unwrap();
        assert!(matches!(backend, StorageBackend::Memory(_)));
    }
}
