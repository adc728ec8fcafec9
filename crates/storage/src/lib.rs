//! Object store seam.
//!
//! One trait covering get/put/delete/presign/stream/list over S3-compatible
//! backends. Every call accepts an optional bucket override so recordings
//! living in a platform-owned bucket can be reached with the service's
//! master credentials.

use async_trait::async_trait;
use std::path::Path;

use rf_domain::Result;

mod memory;
mod s3;

pub use memory::MemoryStorage;
pub use s3::S3Storage;

/// Uniform object-store operations.
///
/// Errors are classified per the domain error enum: access/bucket problems
/// become `StoragePermission` (never retried), a missing key becomes
/// `NotFound`, transport failures become `Http`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Upload a blob under `key`.
    async fn put(&self, key: &str, body: Vec<u8>, bucket: Option<&str>) -> Result<()>;

    /// Fetch a blob.
    async fn get(&self, key: &str, bucket: Option<&str>) -> Result<Vec<u8>>;

    /// Delete a single object. Deleting a missing key is a success.
    async fn delete(&self, key: &str, bucket: Option<&str>) -> Result<()>;

    /// Presigned GET URL valid for `expires_in_secs`.
    async fn presign_get(
        &self,
        key: &str,
        expires_in_secs: u64,
        bucket: Option<&str>,
    ) -> Result<String>;

    /// Download an object to a local file.
    async fn stream_to_file(&self, key: &str, dest: &Path, bucket: Option<&str>) -> Result<u64>;

    /// List keys under a prefix.
    async fn list_prefix(&self, prefix: &str, bucket: Option<&str>) -> Result<Vec<String>>;

    /// The bucket used when no override is given.
    fn default_bucket(&self) -> &str;
}

/// Presigned URLs handed to inference services outlive a single task
/// attempt, so keep them valid for two hours.
pub const PRESIGNED_URL_EXPIRATION_SECONDS: u64 = 7200;
