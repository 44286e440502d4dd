//! Local Photo Archive
//!
//! The coordinator's authoritative copy of every shard. Each top-level directory under
//! the archive root is one shard; its regular files are the photos uploaded to workers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

#[async_trait]
pub trait LocalArchive: Send + Sync {
    /// Names of all shard directories, sorted.
    async fn list_directories(&self) -> Result<Vec<String>>;

    /// Names of the files in one shard, sorted.
    async fn list_files(&self, directory: &str) -> Result<Vec<String>>;

    async fn directory_exists(&self, directory: &str) -> bool;

    async fn read_file(&self, directory: &str, file_name: &str) -> Result<Vec<u8>>;

    /// CRC-32 of a file's content, comparable with what workers report.
    async fn checksum(&self, directory: &str, file_name: &str) -> Result<u32> {
        let bytes = self.read_file(directory, file_name).await?;
        Ok(crc32fast::hash(&bytes))
    }
}

pub struct FsArchive {
    root: PathBuf,
}

impl FsArchive {
    /// Opens the archive, creating the root directory if it does not exist yet.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        if !tokio::fs::try_exists(&root).await.unwrap_or(false) {
            tracing::warn!("Photo archive {} missing, creating it", root.display());
            tokio::fs::create_dir_all(&root)
                .await
                .with_context(|| format!("failed to create {}", root.display()))?;
        }

        Ok(Self { root })
    }

    async fn entries(&self, path: PathBuf, want_dirs: bool) -> Result<Vec<String>> {
        let mut reader = tokio::fs::read_dir(&path)
            .await
            .with_context(|| format!("failed to list {}", path.display()))?;

        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() != want_dirs {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            } else {
                tracing::warn!("Skipping non UTF-8 entry in {}", path.display());
            }
        }

        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl LocalArchive for FsArchive {
    async fn list_directories(&self) -> Result<Vec<String>> {
        self.entries(self.root.clone(), true).await
    }

    async fn list_files(&self, directory: &str) -> Result<Vec<String>> {
        self.entries(self.root.join(directory), false).await
    }

    async fn directory_exists(&self, directory: &str) -> bool {
        tokio::fs::metadata(self.root.join(directory))
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    async fn read_file(&self, directory: &str, file_name: &str) -> Result<Vec<u8>> {
        let path = self.root.join(directory).join(file_name);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))
    }
}
