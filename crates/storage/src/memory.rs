//! In-memory storage backend for tests and local development.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;

use rf_domain::{Error, Result};

use crate::Storage;

/// Map-backed store implementing the same seam as [`crate::S3Storage`].
///
/// Records every delete so tests can assert on cleanup behavior, and can be
/// primed with per-key failures to exercise partial-failure paths.
pub struct MemoryStorage {
    bucket: String,
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
    deletes: RwLock<Vec<(String, String)>>,
    failing_keys: RwLock<Vec<String>>,
}

impl MemoryStorage {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: RwLock::new(HashMap::new()),
            deletes: RwLock::new(Vec::new()),
            failing_keys: RwLock::new(Vec::new()),
        }
    }

    /// Seed an object directly.
    pub fn insert(&self, bucket: &str, key: &str, body: Vec<u8>) {
        self.objects
            .write()
            .insert((bucket.to_string(), key.to_string()), body);
    }

    /// Make operations on `key` fail with a permission error.
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.write().push(key.to_string());
    }

    /// `(bucket, key)` pairs deleted so far, in call order.
    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deletes.read().clone()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .read()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    fn bucket_for<'a>(&'a self, over: Option<&'a str>) -> &'a str {
        over.unwrap_or(&self.bucket)
    }

    fn check_failing(&self, bucket: &str, key: &str, operation: &str) -> Result<()> {
        if self.failing_keys.read().iter().any(|k| k == key) {
            return Err(Error::StoragePermission {
                bucket: bucket.to_string(),
                operation: operation.to_string(),
                message: "AccessDenied".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, key: &str, body: Vec<u8>, bucket: Option<&str>) -> Result<()> {
        let bucket = self.bucket_for(bucket);
        self.check_failing(bucket, key, "put_object")?;
        self.insert(bucket, key, body);
        Ok(())
    }

    async fn get(&self, key: &str, bucket: Option<&str>) -> Result<Vec<u8>> {
        let bucket = self.bucket_for(bucket);
        self.check_failing(bucket, key, "get_object")?;
        self.objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("s3://{bucket}/{key}")))
    }

    async fn delete(&self, key: &str, bucket: Option<&str>) -> Result<()> {
        let bucket = self.bucket_for(bucket);
        self.check_failing(bucket, key, "delete_object")?;
        self.objects
            .write()
            .remove(&(bucket.to_string(), key.to_string()));
        self.deletes
            .write()
            .push((bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn presign_get(
        &self,
        key: &str,
        expires_in_secs: u64,
        bucket: Option<&str>,
    ) -> Result<String> {
        let bucket = self.bucket_for(bucket);
        Ok(format!(
            "memory://{bucket}/{key}?expires={expires_in_secs}"
        ))
    }

    async fn stream_to_file(&self, key: &str, dest: &Path, bucket: Option<&str>) -> Result<u64> {
        let body = self.get(key, bucket).await?;
        tokio::fs::write(dest, &body).await?;
        Ok(body.len() as u64)
    }

    async fn list_prefix(&self, prefix: &str, bucket: Option<&str>) -> Result<Vec<String>> {
        let bucket = self.bucket_for(bucket);
        let mut keys: Vec<String> = self
            .objects
            .read()
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn default_bucket(&self) -> &str {
        &self.bucket
    }
}
