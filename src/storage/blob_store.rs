use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Opaque reference to stored content: the SHA-256 hex digest of the bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobHandle(String);

impl BlobHandle {
    pub fn for_content(data: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(data)))
    }

    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(BlobHandle),

    #[error("Blob backend error: {0}")]
    Backend(String),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Content-addressed storage: putting bytes that are already stored returns
/// the existing handle.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, data: Vec<u8>) -> BlobResult<BlobHandle>;

    async fn get(&self, handle: &BlobHandle) -> BlobResult<Vec<u8>>;

    async fn delete(&self, handle: &BlobHandle) -> BlobResult<()>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<BlobHandle, Arc<[u8]>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Vec<u8>) -> BlobResult<BlobHandle> {
        let handle = BlobHandle::for_content(&data);
        self.blobs
            .write()
            .entry(handle.clone())
            .or_insert_with(|| Arc::from(data));
        Ok(handle)
    }

    async fn get(&self, handle: &BlobHandle) -> BlobResult<Vec<u8>> {
        self.blobs
            .read()
            .get(handle)
            .map(|data| data.to_vec())
            .ok_or_else(|| BlobError::NotFound(handle.clone()))
    }

    async fn delete(&self, handle: &BlobHandle) -> BlobResult<()> {
        self.blobs
            .write()
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(handle.clone()))
    }
}
