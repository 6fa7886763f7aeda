use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use tokio::sync::RwLock;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use super::error::StorageError;
use super::keys::validate_key;
use super::kind::StorageKind;
use super::traits::{BoxReader, ByteRange, ObjectStore, PutOutcome};
use crate::config::OssConfig;

/// S3-compatible object store (Aliyun OSS, MinIO, AWS).
///
/// The bucket handle is rebuilt in the background every
/// `credential_refresh_secs` so short-lived STS credentials from the default
/// chain are replaced before they expire. Requests always use the latest handle.
pub struct S3ObjectStore {
    bucket: Arc<RwLock<Box<Bucket>>>,
}

fn build_bucket(config: &OssConfig) -> Result<Box<Bucket>, StorageError> {
    if config.bucket.is_empty() || config.endpoint.is_empty() {
        return Err(StorageError::Unavailable(
            "object storage bucket or endpoint is not configured".into(),
        ));
    }

    let credentials = match (&config.access_key_id, &config.access_key_secret) {
        (Some(id), Some(secret)) => Credentials::new(
            Some(id.as_str()),
            Some(secret.as_str()),
            config.security_token.as_deref(),
            None,
            None,
        ),
        _ => Credentials::default(),
    }
    .map_err(|e| StorageError::Unavailable(format!("object storage credentials: {e}")))?;

    let region = Region::Custom {
        region: config.region.clone(),
        endpoint: config.endpoint.clone(),
    };
    let bucket = Bucket::new(&config.bucket, region, credentials)
        .map_err(|e| StorageError::Unavailable(format!("object storage client: {e}")))?;

    Ok(if config.path_style {
        bucket.with_path_style()
    } else {
        bucket
    })
}

fn map_s3_error(key: &str, err: S3Error) -> StorageError {
    match err {
        S3Error::HttpFailWithBody(404, _) => StorageError::NotFound(key.to_string()),
        other => StorageError::Backend(other.to_string()),
    }
}

/// Adapt a response body to a reader. A transport error mid-body surfaces as
/// a read error rather than an early EOF.
fn body_reader<S>(body: S) -> BoxReader
where
    S: Stream<Item = Result<Bytes, S3Error>> + Send + Unpin + 'static,
{
    Box::new(StreamReader::new(
        body.map(|chunk| chunk.map_err(std::io::Error::other)),
    ))
}

fn check_status(key: &str, status: u16) -> Result<(), StorageError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(key.to_string())),
        code => Err(StorageError::Backend(format!("HTTP {code} for {key}"))),
    }
}

impl S3ObjectStore {
    /// Build the client and start the credential refresher.
    pub async fn connect(config: &OssConfig) -> Result<Self, StorageError> {
        let bucket = build_bucket(config)?;
        let store = Self {
            bucket: Arc::new(RwLock::new(bucket)),
        };

        let static_keys = config.access_key_id.is_some() && config.access_key_secret.is_some();
        if !static_keys && config.credential_refresh_secs > 0 {
            spawn_refresher(
                Arc::downgrade(&store.bucket),
                config.clone(),
                Duration::from_secs(config.credential_refresh_secs),
            );
        }

        Ok(store)
    }

    async fn bucket(&self) -> Box<Bucket> {
        self.bucket.read().await.clone()
    }

    async fn head(&self, key: &str) -> Result<(Option<String>, u64), StorageError> {
        let (head, status) = self
            .bucket()
            .await
            .head_object(key)
            .await
            .map_err(|e| map_s3_error(key, e))?;
        check_status(key, status)?;
        let size = head.content_length.unwrap_or_default().max(0) as u64;
        Ok((head.e_tag.map(|t| t.trim_matches('"').to_string()), size))
    }
}

fn spawn_refresher(bucket: Weak<RwLock<Box<Bucket>>>, config: OssConfig, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(slot) = bucket.upgrade() else {
                debug!("Object store dropped, stopping credential refresh");
                return;
            };
            match build_bucket(&config) {
                Ok(fresh) => *slot.write().await = fresh,
                Err(e) => warn!(error = %e, "Credential refresh failed, keeping previous client"),
            }
        }
    });
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Oss
    }

    async fn put_stream(&self, key: &str, mut reader: BoxReader) -> Result<PutOutcome, StorageError> {
        validate_key(key)?;
        self.bucket()
            .await
            .put_object_stream(&mut reader, key)
            .await
            .map_err(|e| map_s3_error(key, e))?;
        let (etag, size) = self.head(key).await?;
        Ok(PutOutcome { etag, size })
    }

    async fn get_stream(&self, key: &str) -> Result<BoxReader, StorageError> {
        validate_key(key)?;
        let response = self
            .bucket()
            .await
            .get_object_stream(key)
            .await
            .map_err(|e| map_s3_error(key, e))?;
        check_status(key, response.status_code)?;
        Ok(body_reader(response.bytes))
    }

    async fn get_range(&self, key: &str, range: ByteRange) -> Result<Vec<u8>, StorageError> {
        validate_key(key)?;
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let resp = self
            .bucket()
            .await
            .get_object_range(key, range.start, Some(range.end - 1))
            .await
            .map_err(|e| map_s3_error(key, e))?;
        match resp.status_code() {
            // Range entirely past the end of the object.
            416 => Ok(Vec::new()),
            status => {
                check_status(key, status)?;
                Ok(resp.bytes().to_vec())
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        if !self.exists(key).await? {
            return Ok(false);
        }
        let resp = self
            .bucket()
            .await
            .delete_object(key)
            .await
            .map_err(|e| map_s3_error(key, e))?;
        match resp.status_code() {
            404 => Ok(false),
            status => check_status(key, status).map(|_| true),
        }
    }

    async fn size(&self, key: &str) -> Result<u64, StorageError> {
        validate_key(key)?;
        self.head(key).await.map(|(_, size)| size)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        validate_key(from)?;
        validate_key(to)?;
        let status = self
            .bucket()
            .await
            .copy_object_internal(from, to)
            .await
            .map_err(|e| map_s3_error(from, e))?;
        check_status(from, status)?;
        self.delete(from).await?;
        Ok(())
    }
}
