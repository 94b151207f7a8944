//! Persistent storage for received clips.
//!
//! Clip files are kept after playback; nothing here deletes them.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::Result;

#[async_trait]
pub trait ClipStore: Send + Sync {
    /// Create a new, empty clip file whose name is not in use yet.
    async fn create_unique_file(&self) -> Result<PathBuf>;

    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()>;

    /// Delete a clip that could not be written completely.
    async fn remove(&self, path: &Path) -> Result<()>;
}

/// Writes clips as `sample-<unix millis>.wav` under one directory.
pub struct FsClipStore {
    dir: PathBuf,
}

impl FsClipStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[async_trait]
impl ClipStore for FsClipStore {
    async fn create_unique_file(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;
        let stamp = unix_millis();
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("sample-{}.wav", stamp)
            } else {
                format!("sample-{}-{}.wav", stamp, attempt)
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(_) => return Ok(path),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await?;
        Ok(())
    }
}
