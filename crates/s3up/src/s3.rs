//! Transfers backed by `aws-sdk-s3`
//!
//! Files up to the configured part size are sent with one `PutObject`.
//! Larger files use a multipart upload whose parts are read from disk and
//! sent with bounded concurrency; progress is reported after every part.
//! A multipart upload that is cancelled or fails is aborted.

use crate::config::UploaderConfig;
use crate::credential::CredentialSource;
use crate::region::Region;
use crate::transfer::{InitError, StorageClient, StorageClientFactory, TransferError, TransferJob, TransferListener};

use std::io::SeekFrom;
use std::sync::Arc;

use aws_credential_types::provider::{self, ProvideCredentials};
use aws_sdk_s3::config::BehaviorVersion;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_smithy_runtime_api::client::http::{HttpClient, SharedHttpClient};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on the number of parts of one multipart upload.
pub const MAX_PARTS: u64 = 10_000;

/// Builds [`S3StorageClient`]s.
#[derive(Debug, Default)]
pub struct S3ClientFactory {
    http_client: Option<SharedHttpClient>,
}

impl S3ClientFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends requests through `http_client` instead of the default HTTPS client.
    #[must_use]
    pub fn with_http_client(mut self, http_client: impl HttpClient + 'static) -> Self {
        self.http_client = Some(SharedHttpClient::new(http_client));
        self
    }
}

impl StorageClientFactory for S3ClientFactory {
    fn build(
        &self,
        region: Region,
        credentials: Arc<CredentialSource>,
        config: &UploaderConfig,
    ) -> Result<Arc<dyn StorageClient>, InitError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| InitError::new(format!("uploads require a Tokio runtime: {e}")))?;

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(region.to_sdk())
            .credentials_provider(SourceProvider(credentials))
            .force_path_style(config.force_path_style);
        if let Some(url) = &config.endpoint_url {
            builder = builder.endpoint_url(url);
        }
        if let Some(http_client) = &self.http_client {
            builder = builder.http_client(http_client.clone());
        }

        debug!(%region, endpoint = ?config.endpoint_url, "built storage client");

        Ok(Arc::new(S3StorageClient {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            runtime,
            part_size: config.effective_part_size(),
            concurrency: config.effective_concurrency(),
        }))
    }
}

/// Lets the SDK hold a shared [`CredentialSource`].
#[derive(Debug)]
struct SourceProvider(Arc<CredentialSource>);

impl ProvideCredentials for SourceProvider {
    fn provide_credentials<'a>(&'a self) -> provider::future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        self.0.provide_credentials()
    }
}

enum Outcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct S3StorageClient {
    client: aws_sdk_s3::Client,
    runtime: tokio::runtime::Handle,
    part_size: u64,
    concurrency: usize,
}

impl StorageClient for S3StorageClient {
    fn start_transfer(&self, job: TransferJob, cancel: CancellationToken, listener: Arc<dyn TransferListener>) {
        let this = self.clone();
        self.runtime.spawn(async move {
            match this.run(&job, &cancel, listener.as_ref()).await {
                Ok(Outcome::Completed) => {
                    info!(upload_id = %job.upload_id, key = %job.key, "transfer completed");
                    listener.on_completed();
                }
                Ok(Outcome::Cancelled) => {
                    info!(upload_id = %job.upload_id, "transfer cancelled");
                    listener.on_cancelled();
                }
                Err(err) => {
                    warn!(upload_id = %job.upload_id, %err, "transfer failed");
                    listener.on_failed(err);
                }
            }
        });
    }
}

impl S3StorageClient {
    #[tracing::instrument(skip_all, fields(upload_id = %job.upload_id, bucket = %job.bucket, key = %job.key))]
    async fn run(
        &self,
        job: &TransferJob,
        cancel: &CancellationToken,
        listener: &dyn TransferListener,
    ) -> Result<Outcome, TransferError> {
        let total = tokio::fs::metadata(&job.source_path).await?.len();
        listener.on_progress(0, total);

        if total <= self.part_size {
            return self.run_single(job, total, cancel, listener).await;
        }
        self.run_multipart(job, total, cancel, listener).await
    }

    async fn run_single(
        &self,
        job: &TransferJob,
        total: u64,
        cancel: &CancellationToken,
        listener: &dyn TransferListener,
    ) -> Result<Outcome, TransferError> {
        let put = async {
            let body = tokio::fs::read(&job.source_path).await?;
            let actual = body.len() as u64;
            if actual != total {
                return Err(TransferError::SizeMismatch { expected: total, actual });
            }
            self.client
                .put_object()
                .bucket(&job.bucket)
                .key(&job.key)
                .content_type(&job.content_type)
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(storage_error)?;
            Ok::<_, TransferError>(())
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Ok(Outcome::Cancelled),
            res = put => {
                res?;
                listener.on_progress(total, total);
                Ok(Outcome::Completed)
            }
        }
    }

    async fn run_multipart(
        &self,
        job: &TransferJob,
        total: u64,
        cancel: &CancellationToken,
        listener: &dyn TransferListener,
    ) -> Result<Outcome, TransferError> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&job.bucket)
            .key(&job.key)
            .content_type(&job.content_type)
            .send();
        let created = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(Outcome::Cancelled),
            res = create => res.map_err(storage_error)?,
        };
        let upload_id = created.upload_id().ok_or(TransferError::MissingUploadId)?.to_owned();
        debug!(multipart_upload_id = %upload_id, "multipart upload created");

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Ok(Outcome::Cancelled),
            res = self.upload_parts(job, &upload_id, total, listener) => res.map(|()| Outcome::Completed),
        };

        if !matches!(outcome, Ok(Outcome::Completed)) {
            self.abort(job, &upload_id).await;
        }
        outcome
    }

    async fn upload_parts(
        &self,
        job: &TransferJob,
        upload_id: &str,
        total: u64,
        listener: &dyn TransferListener,
    ) -> Result<(), TransferError> {
        let part_size = self.part_size.max(total.div_ceil(MAX_PARTS));
        let part_count = total.div_ceil(part_size);

        let mut parts = futures::stream::iter(0..part_count)
            .map(|index| self.upload_part(job, upload_id, index, part_size, total))
            .buffer_unordered(self.concurrency);

        let mut completed = Vec::new();
        let mut uploaded = 0;
        while let Some(res) = parts.next().await {
            let (part, len) = res?;
            uploaded += len;
            listener.on_progress(uploaded, total);
            completed.push(part);
        }

        completed.sort_by_key(CompletedPart::part_number);
        let multipart = CompletedMultipartUpload::builder().set_parts(Some(completed)).build();

        self.client
            .complete_multipart_upload()
            .bucket(&job.bucket)
            .key(&job.key)
            .upload_id(upload_id)
            .multipart_upload(multipart)
            .send()
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn upload_part(
        &self,
        job: &TransferJob,
        upload_id: &str,
        index: u64,
        part_size: u64,
        total: u64,
    ) -> Result<(CompletedPart, u64), TransferError> {
        let offset = index * part_size;
        let len = part_size.min(total - offset);
        let part_number = i32::try_from(index + 1).map_err(std::io::Error::other)?;

        let mut buf = vec![0; usize::try_from(len).map_err(std::io::Error::other)?];
        let mut file = tokio::fs::File::open(&job.source_path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buf).await?;

        let output = self
            .client
            .upload_part()
            .bucket(&job.bucket)
            .key(&job.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(buf))
            .send()
            .await
            .map_err(storage_error)?;

        debug!(part_number, len, "part uploaded");

        let part = CompletedPart::builder()
            .set_e_tag(output.e_tag().map(str::to_owned))
            .part_number(part_number)
            .build();
        Ok((part, len))
    }

    async fn abort(&self, job: &TransferJob, upload_id: &str) {
        let res = self
            .client
            .abort_multipart_upload()
            .bucket(&job.bucket)
            .key(&job.key)
            .upload_id(upload_id)
            .send()
            .await;
        match res {
            Ok(_) => debug!(multipart_upload_id = %upload_id, "multipart upload aborted"),
            Err(err) => warn!(multipart_upload_id = %upload_id, err = %DisplayErrorContext(&err), "failed to abort multipart upload"),
        }
    }
}

fn storage_error(err: impl std::error::Error) -> TransferError {
    TransferError::Storage(DisplayErrorContext(err).to_string())
}
