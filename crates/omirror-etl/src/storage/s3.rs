use super::{join_key, ByteReader, Storage, StorageConfig};
use crate::error::{EtlError, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Storage rooted at `s3://bucket/prefix`
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl std::fmt::Debug for S3Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Storage")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish()
    }
}

fn s3_err<E>(context: &str, key: &str, err: E) -> EtlError
where
    E: std::error::Error,
{
    EtlError::Storage(format!("{} {}: {}", context, key, DisplayErrorContext(err)))
}

impl S3Storage {
    pub async fn new(config: &StorageConfig, bucket: &str, prefix: &str) -> Result<Self> {
        debug!("Initializing S3 storage with config: {:?}", config);

        let mut builder = match config.static_credentials() {
            Some((access, secret)) => {
                let credentials = Credentials::new(access, secret, None, None, "omirror-storage");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(Region::new(
                        config.region.clone().unwrap_or_else(|| "us-east-1".to_string()),
                    ))
            },
            None => {
                let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
                let mut builder = aws_sdk_s3::config::Builder::from(&shared);
                if let Some(region) = &config.region {
                    builder = builder.region(Region::new(region.clone()));
                }
                builder
            },
        };

        builder = builder.force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        info!("Storage client initialized for s3://{}/{}", bucket, prefix);

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        join_key(&[self.prefix.as_str(), key])
    }

    /// Object-key prefix for a list call. The storage prefix always ends in
    /// `/` so sibling prefixes (`mirror/sra2`) never match.
    fn list_prefix(&self, prefix: &str) -> String {
        let prefix = prefix.trim_start_matches('/');
        if self.prefix.is_empty() {
            prefix.to_string()
        } else {
            format!("{}/{}", self.prefix, prefix)
        }
    }

    fn relative_key(&self, full: &str) -> String {
        if self.prefix.is_empty() {
            full.to_string()
        } else {
            full.strip_prefix(&self.prefix)
                .map(|k| k.trim_start_matches('/').to_string())
                .unwrap_or_else(|| full.to_string())
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }

    #[instrument(skip(self))]
    async fn open_read(&self, key: &str) -> Result<ByteReader> {
        let full = self.full_key(key);
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
            .map_err(|e| s3_err("failed to download", &full, e))?;
        Ok(Box::new(Box::pin(response.body.into_async_read())))
    }

    #[instrument(skip(self))]
    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let full = self.full_key(key);
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
            .map_err(|e| s3_err("failed to download", &full, e))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| s3_err("failed to read body of", &full, e))?
            .into_bytes()
            .to_vec();
        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), self.bucket, full);
        Ok(data)
    }

    #[instrument(skip(self, data))]
    async fn write(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let full = self.full_key(key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| s3_err("failed to upload", &full, e))?;
        Ok(())
    }

    #[instrument(skip(self, local_path))]
    async fn put_file(&self, key: &str, local_path: &Path) -> Result<u64> {
        let full = self.full_key(key);
        let size = tokio::fs::metadata(local_path).await?.len();
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| s3_err("failed to stage", &full, e))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full)
            .content_length(size as i64)
            .body(body)
            .send()
            .await
            .map_err(|e| s3_err("failed to upload", &full, e))?;

        info!("Uploaded {} bytes to s3://{}/{}", size, self.bucket, full);
        Ok(size)
    }

    async fn mkdir(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    #[instrument(skip(self))]
    async fn exists(&self, key: &str) -> Result<bool> {
        let full = self.full_key(key);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) {
                    Ok(false)
                } else {
                    Err(s3_err("failed to check existence of", &full, e))
                }
            },
        }
    }

    #[instrument(skip(self))]
    async fn unlink(&self, key: &str, missing_ok: bool) -> Result<()> {
        // DeleteObject succeeds for absent keys
        if !missing_ok && !self.exists(key).await? {
            return Err(EtlError::Storage(format!("no such key {}", self.full_key(key))));
        }
        let full = self.full_key(key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
            .map_err(|e| s3_err("failed to delete", &full, e))?;
        debug!("Deleted s3://{}/{}", self.bucket, full);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.list_prefix(prefix);

        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| s3_err("failed to list", &full_prefix, e))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .map(|k| self.relative_key(k)),
            );

            match response.next_continuation_token() {
                Some(next) if response.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string());
                },
                _ => break,
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn storage(prefix: &str) -> S3Storage {
        S3Storage {
            client: Client::from_conf(
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .build(),
            ),
            bucket: "test-bucket".to_string(),
            prefix: prefix.to_string(),
        }
    }

    #[test]
    fn test_key_mapping() {
        let s = storage("mirror/sra");
        assert_eq!(s.full_key("study/_done.json"), "mirror/sra/study/_done.json");
        assert_eq!(s.relative_key("mirror/sra/study/_done.json"), "study/_done.json");
        assert_eq!(s.describe(), "s3://test-bucket/mirror/sra");

        let s = storage("");
        assert_eq!(s.full_key("a/b"), "a/b");
        assert_eq!(s.relative_key("a/b"), "a/b");
    }

    #[test]
    fn test_list_prefix_stays_inside_root() {
        let s = storage("mirror/sra");
        assert_eq!(s.list_prefix(""), "mirror/sra/");
        assert_eq!(s.list_prefix("study/"), "mirror/sra/study/");
        assert_eq!(s.list_prefix("study/date="), "mirror/sra/study/date=");

        let s = storage("");
        assert_eq!(s.list_prefix(""), "");
        assert_eq!(s.list_prefix("study/"), "study/");
    }
}
