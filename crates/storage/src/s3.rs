//! S3 (and S3-compatible) storage backend.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;

use rf_domain::config::StorageConfig;
use rf_domain::{Error, Result};

use crate::Storage;

/// Object store backed by `aws-sdk-s3`.
///
/// Custom-endpoint stores (MinIO and friends) are addressed path-style;
/// credentials come from the configured pair or, when a role ARN is set,
/// the ambient provider chain.
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Storage {
    pub async fn from_config(cfg: &StorageConfig) -> Result<Self> {
        if cfg.access_key_id.is_some() && cfg.role_arn.is_some() {
            return Err(Error::Validation(
                "storage credentials: access-key pair and role ARN are mutually exclusive".into(),
            ));
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(cfg.region.clone()));

        if let (Some(ak), Some(sk)) = (&cfg.access_key_id, &cfg.secret_access_key) {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                ak.clone(),
                sk.clone(),
                None,
                None,
                "reflector-config",
            ));
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &cfg.endpoint_url {
            builder = builder.endpoint_url(endpoint.clone()).force_path_style(true);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: cfg.bucket.clone(),
        })
    }

    fn bucket_for<'a>(&'a self, over: Option<&'a str>) -> &'a str {
        over.unwrap_or(&self.bucket)
    }
}

/// Map an SDK failure to the domain error taxonomy.
///
/// AccessDenied / NoSuchBucket become permission errors carrying the bucket
/// and operation; a missing key becomes NotFound; everything else surfaces
/// as an HTTP error (retried only when transient).
fn map_sdk_err<E, R>(operation: &str, bucket: &str, err: SdkError<E, R>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let code = err.code().unwrap_or_default().to_string();
    let message = err.message().unwrap_or_default().to_string();
    match code.as_str() {
        "AccessDenied" | "NoSuchBucket" | "AllAccessDisabled" | "InvalidAccessKeyId" => {
            Error::StoragePermission {
                bucket: bucket.to_string(),
                operation: operation.to_string(),
                message: if message.is_empty() { code } else { message },
            }
        }
        "NoSuchKey" | "NotFound" => Error::NotFound(format!("s3://{bucket} object")),
        _ => Error::Http(format!("S3 {operation} failed ({code}): {err}")),
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn put(&self, key: &str, body: Vec<u8>, bucket: Option<&str>) -> Result<()> {
        let bucket = self.bucket_for(bucket);
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| map_sdk_err("put_object", bucket, e))?;
        tracing::debug!(bucket = %bucket, key = %key, "object uploaded");
        Ok(())
    }

    async fn get(&self, key: &str, bucket: Option<&str>) -> Result<Vec<u8>> {
        let bucket = self.bucket_for(bucket);
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_err("get_object", bucket, e))?;
        let data = out
            .body
            .collect()
            .await
            .map_err(|e| Error::Http(format!("S3 body read failed: {e}")))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str, bucket: Option<&str>) -> Result<()> {
        let bucket = self.bucket_for(bucket);
        match self
            .client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let mapped = map_sdk_err("delete_object", bucket, e);
                // Deleting a missing key is a success.
                if mapped.is_not_found() {
                    Ok(())
                } else {
                    Err(mapped)
                }
            }
        }
    }

    async fn presign_get(
        &self,
        key: &str,
        expires_in_secs: u64,
        bucket: Option<&str>,
    ) -> Result<String> {
        let bucket = self.bucket_for(bucket);
        let presigning = PresigningConfig::expires_in(Duration::from_secs(expires_in_secs))
            .map_err(|e| Error::Validation(format!("presign expiry: {e}")))?;
        let req = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| map_sdk_err("presign_get_object", bucket, e))?;
        Ok(req.uri().to_string())
    }

    async fn stream_to_file(&self, key: &str, dest: &Path, bucket: Option<&str>) -> Result<u64> {
        let bucket = self.bucket_for(bucket);
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_err("get_object", bucket, e))?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = out.body.into_async_read();
        let written = tokio::io::copy(&mut body, &mut file).await?;
        Ok(written)
    }

    async fn list_prefix(&self, prefix: &str, bucket: Option<&str>) -> Result<Vec<String>> {
        let bucket = self.bucket_for(bucket);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                req = req.continuation_token(token.clone());
            }
            let out = req
                .send()
                .await
                .map_err(|e| map_sdk_err("list_objects_v2", bucket, e))?;

            for obj in out.contents() {
                if let Some(key) = obj.key() {
                    keys.push(key.to_string());
                }
            }

            match out.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }

    fn default_bucket(&self) -> &str {
        &self.bucket
    }
}
