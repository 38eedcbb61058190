//! Storage transfer abstraction
//!
//! The orchestrator talks to object storage through two traits:
//!
//! - [`StorageClientFactory`] builds a [`StorageClient`] bound to a region and a
//!   [`CredentialSource`]
//! - [`StorageClient`] starts a transfer and reports back through a
//!   [`TransferListener`]
//!
//! [`S3ClientFactory`](crate::s3::S3ClientFactory) is the implementation backed
//! by `aws-sdk-s3`.

use crate::config::UploaderConfig;
use crate::credential::CredentialSource;
use crate::region::Region;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// What to upload and where.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub source_path: PathBuf,
    pub content_type: String,
}

/// Callbacks of one transfer.
///
/// A transfer calls `on_progress` any number of times followed by at most one
/// of `on_completed`, `on_failed` or `on_cancelled`. Calls for one transfer
/// are never concurrent.
pub trait TransferListener: Send + Sync + 'static {
    fn on_progress(&self, bytes_current: u64, bytes_total: u64);

    fn on_completed(&self);

    fn on_failed(&self, error: TransferError);

    /// The transfer observed its cancellation token and stopped.
    fn on_cancelled(&self);
}

/// Failure of an in-flight transfer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransferError {
    #[error("failed to read source file: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Storage(String),

    #[error("storage service did not return an upload id")]
    MissingUploadId,

    #[error("source file changed during upload: expected {expected} bytes, read {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

/// Error building a storage client.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct InitError {
    message: String,
}

impl InitError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Cancellable reference to an in-flight transfer.
///
/// Clones refer to the same transfer. Two handles are equal only if they were
/// cloned from the same original.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    serial: u64,
    token: CancellationToken,
    credentials: Option<Arc<CredentialSource>>,
}

impl TransferHandle {
    #[must_use]
    pub fn new() -> Self {
        static SERIAL: AtomicU64 = AtomicU64::new(0);
        Self {
            serial: SERIAL.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
            credentials: None,
        }
    }

    /// Attaches the credential source of the transfer, so the host can rotate its token.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Arc<CredentialSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Requests cancellation. Fire-and-forget; the transfer stops asynchronously.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The token the transfer watches.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn credentials(&self) -> Option<&Arc<CredentialSource>> {
        self.credentials.as_ref()
    }
}

impl Default for TransferHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TransferHandle {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

impl Eq for TransferHandle {}

/// A storage client able to run transfers.
pub trait StorageClient: Send + Sync + 'static {
    /// Starts `job` in the background and returns immediately.
    ///
    /// The transfer must stop and call [`TransferListener::on_cancelled`] once
    /// `cancel` fires. Must not block on I/O.
    fn start_transfer(&self, job: TransferJob, cancel: CancellationToken, listener: Arc<dyn TransferListener>);
}

/// Builds storage clients.
pub trait StorageClientFactory: Send + Sync + 'static {
    /// Builds a client for `region` that signs with `credentials`.
    ///
    /// # Errors
    /// Returns an [`InitError`] if the client cannot be constructed.
    fn build(
        &self,
        region: Region,
        credentials: Arc<CredentialSource>,
        config: &UploaderConfig,
    ) -> Result<Arc<dyn StorageClient>, InitError>;
}

/// `floor(bytes_current * 100 / bytes_total)`, clamped to 100; 0 when the total is unknown.
#[must_use]
pub fn percent(bytes_current: u64, bytes_total: u64) -> u8 {
    if bytes_total == 0 {
        return 0;
    }
    let p = u128::from(bytes_current) * 100 / u128::from(bytes_total);
    u8::try_from(p.min(100)).unwrap_or(100)
}
