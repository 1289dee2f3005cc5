//! Content-addressed blob storage for job output payloads.

pub mod blob_store;

pub use blob_store::{BlobError, BlobHandle, BlobResult, BlobStore, MemoryBlobStore};
