pub mod client_builder;

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::storage::{CopyHandle, CopyProgress, ListPage, Storage, StorageTrait};
use crate::types::HarnessStatistics;
use crate::types::error::HarnessError;
use crate::types::token::HarnessCancellationToken;

// S3 limit on the number of parts of one multipart upload.
const MAX_MULTIPART_PARTS: u64 = 10_000;

/// Extracts the S3 error code and message from an AWS SDK error.
///
/// For service errors (S3 API responses), returns the S3 error code
/// (e.g. "AccessDenied", "SlowDown") and the human-readable error message
/// from the response. For other error types (network, timeout, construction
/// failure), returns "N/A" as the code and the full error description as the
/// message.
fn extract_sdk_error_details<E: std::fmt::Display + ProvideErrorMetadata>(
    e: &SdkError<E>,
) -> (String, String) {
    if let Some(service_err) = e.as_service_error() {
        (
            service_err.code().unwrap_or("unknown").to_string(),
            service_err.message().unwrap_or("no message").to_string(),
        )
    } else {
        ("N/A".to_string(), e.to_string())
    }
}

/// Byte ranges (inclusive) of a multipart copy of `object_size` bytes.
///
/// `part_size` is grown when the object would otherwise need more than
/// 10,000 parts. An empty object has no parts.
pub fn plan_copy_parts(object_size: u64, part_size: u64) -> Vec<(u64, u64)> {
    if object_size == 0 {
        return Vec::new();
    }

    let part_size = part_size
        .max(object_size.div_ceil(MAX_MULTIPART_PARTS))
        .max(1);

    (0..object_size)
        .step_by(part_size as usize)
        .map(|start| (start, (start + part_size).min(object_size) - 1))
        .collect()
}

/// `bucket/key` with the key URL-encoded, as expected by `x-amz-copy-source`.
fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, urlencoding::encode(key))
}

/// Factory for creating S3 storage instances.
pub struct S3StorageFactory;

impl S3StorageFactory {
    pub async fn create(
        config: Config,
        cancellation_token: HarnessCancellationToken,
        stats_sender: Sender<HarnessStatistics>,
        has_warning: Arc<AtomicBool>,
    ) -> Storage {
        let client = if let Some(ref client_config) = config.target_client_config {
            Some(Arc::new(client_config.create_client().await))
        } else {
            None
        };

        Box::new(S3Storage {
            bucket: config.target.bucket().to_string(),
            prefix: config.target.prefix().to_string(),
            multipart_copy_threshold: config.multipart_copy_threshold,
            multipart_copy_part_size: config.multipart_copy_part_size,
            cancellation_token,
            client,
            stats_sender,
            has_warning,
            transfer_semaphore: Arc::new(Semaphore::new(config.transfer_worker_size as usize)),
        })
    }
}

/// S3 storage used by the harness.
///
/// Copies run in their own tokio task. Objects above the multipart copy
/// threshold are copied part by part with `UploadPartCopy`; part copies of
/// every in-flight copy share one semaphore.
#[derive(Clone)]
struct S3Storage {
    bucket: String,
    prefix: String,
    multipart_copy_threshold: u64,
    multipart_copy_part_size: u64,
    cancellation_token: HarnessCancellationToken,
    client: Option<Arc<Client>>,
    stats_sender: Sender<HarnessStatistics>,
    has_warning: Arc<AtomicBool>,
    transfer_semaphore: Arc<Semaphore>,
}

#[async_trait]
impl StorageTrait for S3Storage {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let content_length = body.len();

        self.client()?
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = self.bucket,
                    key = key,
                    content_length = content_length,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 PutObject API call failed for s3://{}/{}: {} ({}).",
                    self.bucket,
                    key,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow!(e).context("aws_sdk_s3::client::put_object() failed.")
            })?;

        Ok(())
    }

    async fn copy_object(&self, source_key: &str, destination_key: &str) -> Result<CopyHandle> {
        self.client()?;

        let storage = self.clone();
        let source_key = source_key.to_string();
        let destination_key = destination_key.to_string();

        Ok(CopyHandle::spawn(move |progress| async move {
            storage
                .copy(&source_key, &destination_key, &progress)
                .await
        }))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client()?
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::warn!(
                    bucket = self.bucket,
                    key = key,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 DeleteObject API call failed for s3://{}/{}: {} ({}).",
                    self.bucket,
                    key,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow!(e).context("aws_sdk_s3::client::delete_object() failed.")
            })?;

        Ok(())
    }

    async fn list_objects(
        &self,
        continuation_token: Option<String>,
        max_keys: i32,
    ) -> Result<ListPage> {
        let output = self
            .client()?
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.prefix)
            .set_continuation_token(continuation_token)
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = self.bucket,
                    prefix = self.prefix,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 ListObjectsV2 API call failed for s3://{}/{}: {} ({}).",
                    self.bucket,
                    self.prefix,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow!(e).context("aws_sdk_s3::client::list_objects_v2() failed.")
            })?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|object| object.key().map(String::from))
            .collect();

        let next_continuation_token = if output.is_truncated() == Some(true) {
            output.next_continuation_token().map(String::from)
        } else {
            None
        };

        Ok(ListPage {
            keys,
            next_continuation_token,
        })
    }

    fn get_stats_sender(&self) -> Sender<HarnessStatistics> {
        self.stats_sender.clone()
    }

    async fn send_stats(&self, stats: HarnessStatistics) {
        let _ = self.stats_sender.send(stats).await;
    }

    fn set_warning(&self) {
        self.has_warning.store(true, Ordering::SeqCst);
    }
}

impl S3Storage {
    fn client(&self) -> Result<&Client> {
        self.client
            .as_deref()
            .ok_or_else(|| anyhow!(HarnessError::Storage("S3 client is not configured.".to_string())))
    }

    async fn copy(
        &self,
        source_key: &str,
        destination_key: &str,
        progress: &Sender<CopyProgress>,
    ) -> Result<()> {
        let _ = progress.send(CopyProgress::Started).await;

        let object_size = self.head_object_size(source_key).await?;

        if object_size <= self.multipart_copy_threshold {
            self.copy_object_single(source_key, destination_key).await?;
            let _ = progress
                .send(CopyProgress::BytesTransferred(object_size))
                .await;
        } else {
            self.copy_object_multipart(source_key, destination_key, object_size, progress)
                .await?;
        }

        let _ = progress.send(CopyProgress::Completed).await;

        Ok(())
    }

    async fn head_object_size(&self, key: &str) -> Result<u64> {
        let output = self
            .client()?
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = self.bucket,
                    key = key,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 HeadObject API call failed for s3://{}/{}: {} ({}).",
                    self.bucket,
                    key,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow!(e).context("aws_sdk_s3::client::head_object() failed.")
            })?;

        Ok(output.content_length().unwrap_or_default().max(0) as u64)
    }

    async fn copy_object_single(&self, source_key: &str, destination_key: &str) -> Result<()> {
        self.client()?
            .copy_object()
            .bucket(&self.bucket)
            .key(destination_key)
            .copy_source(copy_source(&self.bucket, source_key))
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = self.bucket,
                    source_key = source_key,
                    key = destination_key,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 CopyObject API call failed for s3://{}/{} -> {}: {} ({}).",
                    self.bucket,
                    source_key,
                    destination_key,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow!(e).context("aws_sdk_s3::client::copy_object() failed.")
            })?;

        Ok(())
    }

    async fn copy_object_multipart(
        &self,
        source_key: &str,
        destination_key: &str,
        object_size: u64,
        progress: &Sender<CopyProgress>,
    ) -> Result<()> {
        let output = self
            .client()?
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(destination_key)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = self.bucket,
                    key = destination_key,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 CreateMultipartUpload API call failed for s3://{}/{}: {} ({}).",
                    self.bucket,
                    destination_key,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow!(e).context("aws_sdk_s3::client::create_multipart_upload() failed.")
            })?;

        let upload_id = output
            .upload_id()
            .map(String::from)
            .ok_or_else(|| {
                anyhow!(HarnessError::Storage(format!(
                    "CreateMultipartUpload returned no upload id for {destination_key}."
                )))
            })?;

        tracing::debug!(
            key = destination_key,
            upload_id = upload_id,
            object_size = object_size,
            "multipart copy started."
        );

        let parts = match self
            .upload_part_copies(source_key, destination_key, &upload_id, object_size, progress)
            .await
        {
            Ok(parts) => parts,
            Err(e) => {
                self.abort_multipart_upload(destination_key, &upload_id)
                    .await;
                return Err(e);
            }
        };

        let result = self
            .client()?
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(destination_key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = self.bucket,
                    key = destination_key,
                    upload_id = upload_id,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 CompleteMultipartUpload API call failed for s3://{}/{}: {} ({}).",
                    self.bucket,
                    destination_key,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow!(e).context("aws_sdk_s3::client::complete_multipart_upload() failed.")
            });

        if let Err(e) = result {
            self.abort_multipart_upload(destination_key, &upload_id)
                .await;
            return Err(e);
        }

        Ok(())
    }

    async fn upload_part_copies(
        &self,
        source_key: &str,
        destination_key: &str,
        upload_id: &str,
        object_size: u64,
        progress: &Sender<CopyProgress>,
    ) -> Result<Vec<CompletedPart>> {
        let ranges = plan_copy_parts(object_size, self.multipart_copy_part_size);
        let mut join_set = JoinSet::new();

        for (index, (first_byte, last_byte)) in ranges.into_iter().enumerate() {
            let storage = self.clone();
            let source_key = source_key.to_string();
            let destination_key = destination_key.to_string();
            let upload_id = upload_id.to_string();
            let progress = progress.clone();
            let part_number = index as i32 + 1;

            join_set.spawn(async move {
                let _permit = storage
                    .transfer_semaphore
                    .acquire()
                    .await
                    .context("transfer semaphore closed.")?;

                if storage.cancellation_token.is_cancelled() {
                    return Err(anyhow!(HarnessError::Cancelled));
                }

                let output = storage
                    .client()?
                    .upload_part_copy()
                    .bucket(&storage.bucket)
                    .key(&destination_key)
                    .upload_id(&upload_id)
                    .part_number(part_number)
                    .copy_source(copy_source(&storage.bucket, &source_key))
                    .copy_source_range(format!("bytes={first_byte}-{last_byte}"))
                    .send()
                    .await
                    .map_err(|e| {
                        let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                        tracing::error!(
                            bucket = storage.bucket,
                            source_key = source_key,
                            key = destination_key,
                            part_number = part_number,
                            s3_error_code = s3_error_code,
                            s3_error_message = s3_error_message,
                            "S3 UploadPartCopy API call failed for s3://{}/{} part {}: {} ({}).",
                            storage.bucket,
                            destination_key,
                            part_number,
                            s3_error_code,
                            s3_error_message,
                        );
                        anyhow!(e).context("aws_sdk_s3::client::upload_part_copy() failed.")
                    })?;

                let _ = progress
                    .send(CopyProgress::BytesTransferred(last_byte - first_byte + 1))
                    .await;

                let e_tag = output
                    .copy_part_result()
                    .and_then(|result| result.e_tag())
                    .map(String::from);

                Ok(CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(e_tag)
                    .build())
            });
        }

        let mut parts = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let part = match joined {
                Ok(part) => part,
                Err(join_error) => Err(anyhow!(HarnessError::TaskPanicked(
                    join_error.to_string()
                ))),
            };

            match part {
                Ok(part) => parts.push(part),
                Err(e) => {
                    join_set.abort_all();
                    return Err(e);
                }
            }
        }

        parts.sort_by_key(|part| part.part_number());
        Ok(parts)
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) {
        let Ok(client) = self.client() else {
            return;
        };

        let result = client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;

        if let Err(e) = result {
            let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
            tracing::warn!(
                bucket = self.bucket,
                key = key,
                upload_id = upload_id,
                s3_error_code = s3_error_code,
                s3_error_message = s3_error_message,
                "S3 AbortMultipartUpload API call failed for s3://{}/{}: {} ({}).",
                self.bucket,
                key,
                s3_error_code,
                s3_error_message,
            );
            self.set_warning();
        }
    }
}
