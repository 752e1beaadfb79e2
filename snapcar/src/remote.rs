use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{MultipartUpload, ObjectStore, PutPayload, RetryConfig};
use serde::Serialize;
use snapcar_db::{Artifact, TIMESTAMP_FORMAT};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::config::{Backend, Config};
use crate::error::{ConfigError, Result, UploadError};

/// Size of one multipart part; smaller artifacts use a single PUT.
const PART_SIZE: u64 = 10 * 1024 * 1024;

/// Where an uploaded snapshot ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ObjectLocator {
    pub(crate) store: String,
    pub(crate) key: String,
    pub(crate) url: String,
}

impl ObjectLocator {
    fn new(scheme: &str, store: &str, key: &str) -> Self {
        Self {
            store: store.to_string(),
            key: key.to_string(),
            url: format!("{scheme}://{store}/{key}"),
        }
    }
}

/// Object key for a snapshot taken at `created_at`.
///
/// `prefix` is prepended verbatim, without an implied separator.
pub(crate) fn object_key(
    prefix: &str,
    instance_id: &str,
    created_at: DateTime<Utc>,
    extension: &str,
) -> String {
    format!(
        "{prefix}{instance_id}-{}{extension}",
        created_at.format(TIMESTAMP_FORMAT)
    )
}

/// Shared client for the remote object store.
///
/// Built once at startup; credential resolution happens here and not per
/// request.
pub(crate) struct RemoteStore {
    client: Arc<dyn ObjectStore>,
    scheme: &'static str,
    bucket: String,
    prefix: String,
    instance_id: String,
    extension: String,
    timeout: Option<Duration>,
}

impl RemoteStore {
    pub(crate) fn from_config(config: &Config) -> Result<Self> {
        let bucket = config.bucket()?.to_string();
        let remote = &config.remote;

        let (client, scheme): (Arc<dyn ObjectStore>, &'static str) = match remote.backend {
            Backend::S3 => {
                let mut builder = AmazonS3Builder::from_env()
                    .with_bucket_name(&bucket)
                    .with_allow_http(remote.allow_http)
                    .with_retry(RetryConfig {
                        max_retries: remote.max_retries,
                        ..Default::default()
                    });
                if let Some(region) = &remote.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &remote.endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                let s3 = builder.build().map_err(ConfigError::from)?;
                (Arc::new(s3), "s3")
            }
            Backend::Local => {
                let root = remote.local_root.as_ref().ok_or_else(|| ConfigError::Invalid {
                    reason: "the local backend requires remote.local_root".to_string(),
                })?;
                let local = LocalFileSystem::new_with_prefix(root).map_err(ConfigError::from)?;
                (Arc::new(local), "file")
            }
        };

        Ok(Self {
            client,
            scheme,
            bucket,
            prefix: remote.prefix.clone(),
            instance_id: config.instance_id()?.to_string(),
            extension: remote.extension.clone(),
            timeout: config.upload_timeout(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_client(
        client: Arc<dyn ObjectStore>,
        scheme: &'static str,
        bucket: &str,
        prefix: &str,
        instance_id: &str,
    ) -> Self {
        Self {
            client,
            scheme,
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            instance_id: instance_id.to_string(),
            extension: ".db".to_string(),
            timeout: None,
        }
    }

    pub(crate) fn bucket(&self) -> &str {
        &self.bucket
    }

    pub(crate) fn key_for(&self, artifact: &Artifact) -> String {
        object_key(
            &self.prefix,
            &self.instance_id,
            artifact.created_at(),
            &self.extension,
        )
    }

    /// Copy the artifact into the store and return where it landed.
    ///
    /// Artifacts smaller than one part go up in a single PUT. Larger ones use
    /// a multipart upload, so artifacts larger than memory are fine. A failed,
    /// timed out or cancelled multipart upload is aborted. Nothing is retried
    /// here.
    pub(crate) async fn upload(
        &self,
        artifact: &Artifact,
    ) -> std::result::Result<ObjectLocator, UploadError> {
        let key = self.key_for(artifact);
        let location = ObjectPath::parse(&key).map_err(|e| UploadError::InvalidKey {
            key: key.clone(),
            source: e,
        })?;
        let key = location.as_ref().to_string();

        let file = File::open(artifact.path())
            .await
            .map_err(|e| UploadError::Open {
                path: artifact.path().display().to_string(),
                source: e,
            })?;

        let transfer = self.transfer(file, artifact, &location);
        let bytes = match self.timeout {
            // Dropping the transfer on timeout aborts any multipart upload.
            Some(limit) => tokio::time::timeout(limit, transfer)
                .await
                .map_err(|_| UploadError::Timeout {
                    store: self.bucket.clone(),
                    key: key.clone(),
                    secs: limit.as_secs(),
                })??,
            None => transfer.await?,
        };

        log::info!("uploaded {bytes} bytes to {}://{}/{key}", self.scheme, self.bucket);
        Ok(ObjectLocator::new(self.scheme, &self.bucket, &key))
    }

    async fn transfer(
        &self,
        mut file: File,
        artifact: &Artifact,
        location: &ObjectPath,
    ) -> std::result::Result<u64, UploadError> {
        let key = location.as_ref();
        let mut part = read_part(&mut file, artifact).await?;

        if (part.len() as u64) < PART_SIZE {
            let bytes = part.len() as u64;
            self.client
                .put(location, PutPayload::from(part))
                .await
                .map_err(|e| self.transfer_error(key, e))?;
            return Ok(bytes);
        }

        let upload = self
            .client
            .put_multipart(location)
            .await
            .map_err(|e| self.transfer_error(key, e))?;
        let mut multipart = PendingMultipart::new(upload, key);

        let sent = async {
            let mut bytes = 0;
            while !part.is_empty() {
                bytes += part.len() as u64;
                multipart
                    .put_part(part)
                    .await
                    .map_err(|e| self.transfer_error(key, e))?;
                part = read_part(&mut file, artifact).await?;
            }
            Ok::<u64, UploadError>(bytes)
        }
        .await;

        match sent {
            Ok(bytes) => {
                multipart
                    .complete()
                    .await
                    .map_err(|e| self.transfer_error(key, e))?;
                Ok(bytes)
            }
            Err(e) => {
                multipart.abort().await;
                Err(e)
            }
        }
    }

    fn transfer_error(&self, key: &str, source: object_store::Error) -> UploadError {
        UploadError::Transfer {
            store: self.bucket.clone(),
            key: key.to_string(),
            source,
        }
    }
}

/// Read the next part of the artifact; empty at end of file.
async fn read_part(
    file: &mut File,
    artifact: &Artifact,
) -> std::result::Result<Bytes, UploadError> {
    let mut buf = Vec::with_capacity(PART_SIZE as usize);
    file.take(PART_SIZE)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| UploadError::Read {
            path: artifact.path().display().to_string(),
            source: e,
        })?;
    Ok(Bytes::from(buf))
}

/// A multipart upload that is aborted unless it completes.
///
/// When dropped unfinished (the request was cancelled or timed out) the
/// abort runs on a spawned task.
struct PendingMultipart {
    upload: Option<Box<dyn MultipartUpload>>,
    key: String,
}

impl PendingMultipart {
    fn new(upload: Box<dyn MultipartUpload>, key: &str) -> Self {
        Self {
            upload: Some(upload),
            key: key.to_string(),
        }
    }

    async fn put_part(&mut self, part: Bytes) -> object_store::Result<()> {
        match self.upload.as_mut() {
            Some(upload) => upload.put_part(PutPayload::from(part)).await,
            None => Ok(()),
        }
    }

    /// Finish the upload; a failed completion is aborted.
    async fn complete(mut self) -> object_store::Result<()> {
        let Some(upload) = self.upload.as_mut() else {
            return Ok(());
        };
        let completed = upload.complete().await;
        match completed {
            Ok(_) => {
                self.upload = None;
                Ok(())
            }
            Err(e) => {
                self.abort().await;
                Err(e)
            }
        }
    }

    async fn abort(mut self) {
        if let Some(upload) = self.upload.as_mut() {
            match upload.abort().await {
                Ok(()) => log::debug!("aborted multipart upload of {}", self.key),
                Err(e) => log::warn!("failed to abort upload of {}: {e}", self.key),
            }
        }
        self.upload = None;
    }
}

impl Drop for PendingMultipart {
    fn drop(&mut self) {
        let Some(mut upload) = self.upload.take() else {
            return;
        };
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match upload.abort().await {
                        Ok(()) => log::debug!("aborted cancelled upload of {key}"),
                        Err(e) => log::warn!("failed to abort cancelled upload of {key}: {e}"),
                    }
                });
            }
            Err(_) => log::warn!("cannot abort upload of {key}: no runtime"),
        }
    }
}
