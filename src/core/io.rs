use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;
    async fn write(&self, path: &Path, content: &[u8]) -> Result<()>;
    async fn append(&self, path: &Path, content: &[u8]) -> Result<()>;
    async fn exists(&self, path: &Path) -> Result<bool>;
    async fn create_dir(&self, path: &Path) -> Result<()>;
    /// Names of the directories directly below `path`.
    async fn list_dirs(&self, path: &Path) -> Result<Vec<String>>;

    async fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes).with_context(|| format!("{} is not valid UTF-8", path.display()))
    }
}

pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeStorage {
    fn default() -> Self {
        Self::new()
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    async fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        ensure_parent(path).await?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    async fn append(&self, path: &Path, content: &[u8]) -> Result<()> {
        ensure_parent(path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open {} for append", path.display()))?;
        file.write_all(content).await?;
        file.flush().await?;
        Ok(())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn create_dir(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))
    }

    async fn list_dirs(&self, path: &Path) -> Result<Vec<String>> {
        let mut entries = Vec::new();

        if path.is_dir() {
            let mut dir = tokio::fs::read_dir(path).await?;
            while let Some(entry) = dir.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    entries.push(entry.file_name().to_string_lossy().to_string());
                }
            }
        }

        Ok(entries)
    }
}
