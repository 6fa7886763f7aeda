use std::io::Cursor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::StorageError;
use super::kind::StorageKind;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Result of a completed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutOutcome {
    /// Backend entity tag. The local store reports the SHA-256 of the content.
    pub etag: Option<String>,
    pub size: u64,
}

/// Key-addressed object storage.
///
/// Writes are all-or-nothing: a failed `put_stream` leaves no object behind.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn kind(&self) -> StorageKind;

    /// Store bytes under `key`, replacing any existing object.
    async fn put(&self, key: &str, data: &[u8]) -> Result<PutOutcome, StorageError> {
        let reader: BoxReader = Box::new(Cursor::new(data.to_vec()));
        self.put_stream(key, reader).await
    }

    /// Store everything `reader` yields under `key`.
    async fn put_stream(&self, key: &str, reader: BoxReader) -> Result<PutOutcome, StorageError>;

    /// Retrieve all bytes of an object.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let mut reader = self.get_stream(key).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Retrieve an object as a streaming async reader.
    async fn get_stream(&self, key: &str) -> Result<BoxReader, StorageError>;

    /// Read `range` from an object with a single positioned request.
    ///
    /// The range is clipped to the object size.
    async fn get_range(&self, key: &str, range: ByteRange) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Delete an object.
    ///
    /// Returns `true` if the object was deleted, `false` if it did not exist.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Get the size of an object in bytes.
    async fn size(&self, key: &str) -> Result<u64, StorageError>;

    /// Move an object to `to`, replacing whatever is stored there.
    async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError>;
}
