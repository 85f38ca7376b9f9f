// graph_ingest/src/storage/local.rs
// Object store backed by a directory tree; keys are relative paths.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use super::ObjectStore;
use crate::error::{IngestError, Result};

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf,>,) -> Self {
        Self { root: root.into(), }
    }

    pub fn root(&self,) -> &Path {
        &self.root
    }

    /// Moves `key` below `to_prefix`, keeping its path relative to `from_prefix`.
    /// Returns the new key.
    pub async fn archive(&self, key: &str, from_prefix: &str, to_prefix: &str,) -> Result<String,> {
        let relative = key.strip_prefix(from_prefix,).unwrap_or(key,);
        let target = format!("{}{}", to_prefix, relative);
        let from = self.resolve(key,)?;
        let to = self.resolve(&target,)?;
        if let Some(parent,) = to.parent() {
            tokio::fs::create_dir_all(parent,).await?;
        }
        tokio::fs::rename(&from, &to,).await.map_err(|e| {
            IngestError::Storage(format!("Failed to move {} to {}: {}", key, target, e),)
        },)?;
        Ok(target,)
    }

    fn resolve(&self, key: &str,) -> Result<PathBuf,> {
        let relative = Path::new(key,);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)),)
        {
            return Err(IngestError::Storage(format!("Key '{}' escapes the store root", key),),);
        }
        Ok(self.root.join(relative,),)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get_object(&self, key: &str,) -> Result<String,> {
        let path = self.resolve(key,)?;
        tokio::fs::read_to_string(&path,)
            .await
            .map_err(|e| IngestError::Storage(format!("Failed to read {}: {}", path.display(), e),),)
    }

    async fn put_object(&self, key: &str, body: &str,) -> Result<(),> {
        let path = self.resolve(key,)?;
        if let Some(parent,) = path.parent() {
            tokio::fs::create_dir_all(parent,).await?;
        }
        tokio::fs::write(&path, body,).await?;
        debug!(key, bytes = body.len(), "Wrote object");
        Ok((),)
    }

    /// Stops reading once `max_lines` lines are in hand.
    async fn read_head(&self, key: &str, max_lines: usize,) -> Result<String,> {
        let path = self.resolve(key,)?;
        let file = tokio::fs::File::open(&path,)
            .await
            .map_err(|e| IngestError::Storage(format!("Failed to open {}: {}", path.display(), e),),)?;
        let mut reader = BufReader::new(file,);
        let mut head = String::new();
        for _ in 0..max_lines {
            if reader.read_line(&mut head,).await? == 0 {
                break;
            }
        }
        Ok(head,)
    }

    async fn list(&self, prefix: &str,) -> Result<Vec<String,>,> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            for entry in walkdir::WalkDir::new(&root,)
                .into_iter()
                .filter_map(|e| e.ok(),)
            {
                if !entry.path().is_file() {
                    continue;
                }
                let Ok(relative,) = entry.path().strip_prefix(&root,) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy(),)
                    .collect::<Vec<_,>>()
                    .join("/",);
                if key.starts_with(&prefix,) {
                    keys.push(key,);
                }
            }
            keys.sort();
            keys
        },)
        .await
        .map_err(|e| IngestError::Other(format!("Listing task failed: {}", e),),)
    }
}
