// graph_ingest/src/storage/mod.rs
// Object storage capability used for source files and transformed output.

pub mod local;

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{IngestError, Result};

pub use local::LocalObjectStore;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, key: &str,) -> Result<String,>;

    async fn put_object(&self, key: &str, body: &str,) -> Result<(),>;

    async fn list(&self, prefix: &str,) -> Result<Vec<String,>,>;

    /// First `max_lines` lines of the object with their line breaks kept.
    async fn read_head(&self, key: &str, max_lines: usize,) -> Result<String,> {
        let content = self.get_object(key,).await?;
        Ok(head_lines(&content, max_lines,),)
    }
}

pub fn head_lines(content: &str, max_lines: usize,) -> String {
    content.split_inclusive('\n',).take(max_lines,).collect()
}

#[derive(Debug, Default,)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<String, String,>,>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self,) -> Vec<String,> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner(),)
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_object(&self, key: &str,) -> Result<String,> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner(),)
            .get(key,)
            .cloned()
            .ok_or_else(|| IngestError::Storage(format!("NoSuchKey: {}", key),),)
    }

    async fn put_object(&self, key: &str, body: &str,) -> Result<(),> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner(),)
            .insert(key.to_string(), body.to_string(),);
        Ok((),)
    }

    async fn list(&self, prefix: &str,) -> Result<Vec<String,>,> {
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner(),)
            .keys()
            .filter(|k| k.starts_with(prefix,),)
            .cloned()
            .collect(),)
    }
}
