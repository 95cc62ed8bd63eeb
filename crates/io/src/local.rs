use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use crate::{ErrorKind, IOError, Location, Storage, WritePrecondition};

/// Storage on the local filesystem for `file://` locations.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl LocalStorage {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn to_path(location: &Location) -> Result<PathBuf, IOError> {
    if location.scheme() != "file" {
        return Err(IOError::new(
            ErrorKind::ConfigInvalid,
            "Local storage only supports file:// locations",
            location.as_str(),
        ));
    }
    location.url().to_file_path().map_err(|()| {
        IOError::new(
            ErrorKind::ConfigInvalid,
            "Location is not a valid local path",
            location.as_str(),
        )
    })
}

async fn collect_files(root: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                pending.push(entry.path());
            } else {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

#[async_trait]
impl Storage for LocalStorage {
    async fn write(
        &self,
        location: &Location,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<(), IOError> {
        let path = to_path(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IOError::from_std_io(e, "create parent directory", location.as_str()))?;
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true);
        match precondition {
            WritePrecondition::DoesNotExist => options.create_new(true),
            WritePrecondition::None => options.create(true).truncate(true),
        };
        let mut file = options
            .open(&path)
            .await
            .map_err(|e| IOError::from_std_io(e, "open file for writing", location.as_str()))?;
        file.write_all(&data)
            .await
            .map_err(|e| IOError::from_std_io(e, "write file", location.as_str()))?;
        file.sync_all()
            .await
            .map_err(|e| IOError::from_std_io(e, "sync file", location.as_str()))?;
        Ok(())
    }

    async fn read(&self, location: &Location) -> Result<Bytes, IOError> {
        let path = to_path(location)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| IOError::from_std_io(e, "read file", location.as_str()))
    }

    async fn exists(&self, location: &Location) -> Result<bool, IOError> {
        let path = to_path(location)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| IOError::from_std_io(e, "check file existence", location.as_str()))
    }

    async fn delete(&self, location: &Location) -> Result<(), IOError> {
        let path = to_path(location)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IOError::from_std_io(e, "delete file", location.as_str())),
        }
    }

    async fn remove_all(&self, prefix: &Location) -> Result<(), IOError> {
        let path = to_path(prefix)?;
        let result = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IOError::from_std_io(e, "remove directory", prefix.as_str())),
        }
    }

    async fn list(&self, prefix: &Location) -> Result<Vec<Location>, IOError> {
        let root = to_path(prefix)?;
        let files = collect_files(&root)
            .await
            .map_err(|e| IOError::from_std_io(e, "list directory", prefix.as_str()))?;
        files
            .into_iter()
            .map(|path| {
                url::Url::from_file_path(&path).map(Location::from).map_err(|()| {
                    IOError::new(
                        ErrorKind::Unexpected,
                        "Listed path cannot be represented as URL",
                        path.to_string_lossy(),
                    )
                })
            })
            .collect()
    }
}
