use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::StorageError;
use super::hash::ContentHash;

pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Content-addressed storage for delivery attachments.
///
/// Identical uploads share one blob; callers track references themselves and
/// call [`BlobStore::delete`] once the last reference is gone.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes and return their content hash. Storing existing content is a no-op.
    async fn put(&self, data: &[u8]) -> Result<ContentHash, StorageError>;

    /// Open a blob for streaming.
    async fn get_stream(&self, hash: &ContentHash) -> Result<BoxReader, StorageError>;

    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, StorageError> {
        let mut reader = self.get_stream(hash).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn exists(&self, hash: &ContentHash) -> Result<bool, StorageError>;

    /// Returns `false` when the blob was already gone.
    async fn delete(&self, hash: &ContentHash) -> Result<bool, StorageError>;
}
