use std::{sync::LazyLock, time::Duration};

use moka::future::Cache;

use crate::{CONFIG, spec::TableMetadataRef};

// Metadata generations are immutable, so a location always maps to the same content
static METADATA_CACHE: LazyLock<Cache<String, TableMetadataRef>> = LazyLock::new(|| {
    Cache::builder()
        .max_capacity(CONFIG.cache.metadata.capacity)
        .initial_capacity(50)
        .time_to_live(Duration::from_secs(
            CONFIG.cache.metadata.time_to_live_secs,
        ))
        .build()
});

pub(super) async fn metadata_cache_get(metadata_location: &str) -> Option<TableMetadataRef> {
    if !CONFIG.cache.metadata.enabled {
        return None;
    }
    let cached = METADATA_CACHE.get(metadata_location).await;
    if cached.is_some() {
        tracing::debug!("Metadata cache hit for {metadata_location}");
    } else {
        tracing::debug!("Metadata cache miss for {metadata_location}");
    }
    cached
}

pub(super) async fn metadata_cache_insert(metadata_location: &str, metadata: TableMetadataRef) {
    if CONFIG.cache.metadata.enabled {
        tracing::debug!("Inserting metadata generation {metadata_location} into cache");
        METADATA_CACHE
            .insert(metadata_location.to_string(), metadata)
            .await;
    }
}

pub(super) async fn metadata_cache_invalidate(metadata_location: &str) {
    if CONFIG.cache.metadata.enabled {
        tracing::debug!("Invalidating metadata generation {metadata_location} from cache");
        METADATA_CACHE.invalidate(metadata_location).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::spec::test_metadata;

    #[tokio::test]
    async fn test_cache_round_trip() {
        let location = format!("memory://cache-test/{}.metadata.json", uuid::Uuid::now_v7());
        assert!(metadata_cache_get(&location).await.is_none());

        let metadata = Arc::new(test_metadata());
        metadata_cache_insert(&location, metadata.clone()).await;
        assert_eq!(metadata_cache_get(&location).await, Some(metadata));

        metadata_cache_invalidate(&location).await;
        assert!(metadata_cache_get(&location).await.is_none());
    }
}
