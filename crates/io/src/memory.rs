use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::{ErrorKind, IOError, Location, Storage, WritePrecondition};

/// Process-local object store. Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl InMemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

fn key(location: &Location) -> String {
    let mut location = location.clone();
    location.without_trailing_slash();
    location.as_str().to_string()
}

fn prefix_key(prefix: &Location) -> String {
    let mut prefix = prefix.clone();
    prefix.with_trailing_slash();
    prefix.as_str().to_string()
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn write(
        &self,
        location: &Location,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<(), IOError> {
        let key = key(location);
        let mut objects = self.objects.write().await;
        if precondition == WritePrecondition::DoesNotExist && objects.contains_key(&key) {
            return Err(IOError::new(
                ErrorKind::ConditionNotMatch,
                "Object already exists",
                key,
            ));
        }
        objects.insert(key, data);
        Ok(())
    }

    async fn read(&self, location: &Location) -> Result<Bytes, IOError> {
        let key = key(location);
        self.objects
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| IOError::new(ErrorKind::NotFound, "Object not found", key))
    }

    async fn exists(&self, location: &Location) -> Result<bool, IOError> {
        Ok(self.objects.read().await.contains_key(&key(location)))
    }

    async fn delete(&self, location: &Location) -> Result<(), IOError> {
        self.objects.write().await.remove(&key(location));
        Ok(())
    }

    async fn remove_all(&self, prefix: &Location) -> Result<(), IOError> {
        let exact = key(prefix);
        let below = prefix_key(prefix);
        self.objects
            .write()
            .await
            .retain(|k, _| k != &exact && !k.starts_with(&below));
        Ok(())
    }

    async fn list(&self, prefix: &Location) -> Result<Vec<Location>, IOError> {
        let below = prefix_key(prefix);
        self.objects
            .read()
            .await
            .range(below.clone()..)
            .take_while(|(k, _)| k.starts_with(&below))
            .map(|(k, _)| Location::parse_value(k).map_err(IOError::from))
            .collect()
    }
}
