//! Upload orchestration
//!
//! [`UploadOrchestrator`] validates requests, builds a storage client per
//! upload, registers the transfer for cancellation and turns transfer
//! callbacks into [`UploadEvent`]s.
//!
//! # Lifecycle
//!
//! `Submitted → validating → InProgress → Completed | Failed | Cancelled`
//!
//! - Validation (arguments, file existence, region, duplicate id) and client
//!   construction happen synchronously inside [`UploadOrchestrator::start`].
//!   Failures are returned immediately and never touch the registry or the
//!   event stream.
//! - Once registered, the upload reports through both the event stream and
//!   the returned [`PendingUpload`]. Exactly one terminal event is emitted,
//!   and the pending result resolves exactly once.
//! - Cancellation removes the upload from the registry, truncates its event
//!   sequence without a terminal event, and resolves the pending result with
//!   [`UploadError::Cancelled`].
//!
//! # Example
//!
//! ```no_run
//! use s3up::UploadOrchestrator;
//! use s3up::request::StartUploadArgs;
//!
//! # async fn run() -> Result<(), s3up::UploadError> {
//! let orchestrator = UploadOrchestrator::builder().build();
//! let mut events = orchestrator.events().channel();
//!
//! let args = StartUploadArgs {
//!     upload_id: "u-1".into(),
//!     bucket: "my-bucket".into(),
//!     source_path: "/tmp/a.jpg".into(),
//!     file_name: "a.jpg".into(),
//!     upload_folder: "images".into(),
//!     region: "us-east-1".into(),
//!     token: "<token>".into(),
//!     identity_id: "us-east-1:<identity>".into(),
//!     provider_name: "login.example.com".into(),
//!     ..Default::default()
//! };
//! let pending = orchestrator.start(args.into_request()?)?;
//!
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//! });
//!
//! let url = pending.await?;
//! println!("uploaded to {url}");
//! # Ok(())
//! # }
//! ```

use crate::config::{StaticConfigProvider, UploaderConfigProvider};
use crate::credential::{CognitoIdentityBroker, CredentialSource, IdentityBroker};
use crate::error::{UploadError, UploadResult};
use crate::event::{EventBridge, UploadEvent};
use crate::region::Region;
use crate::registry::{Occupied, UploadRegistry};
use crate::request::UploadRequest;
use crate::s3::S3ClientFactory;
use crate::transfer::{StorageClientFactory, TransferError, TransferHandle, TransferJob, TransferListener, percent};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

const TRANSFER_ABANDONED: &str = "transfer ended without a result";

/// Builder for [`UploadOrchestrator`].
///
/// Defaults:
///
/// - **Factory**: [`S3ClientFactory::new()`]
/// - **Broker**: [`CognitoIdentityBroker::new()`]
/// - **Config**: [`StaticConfigProvider::default()`]
#[derive(Default)]
pub struct UploadOrchestratorBuilder {
    factory: Option<Box<dyn StorageClientFactory>>,
    broker: Option<Arc<dyn IdentityBroker>>,
    config: Option<Arc<dyn UploaderConfigProvider>>,
}

impl UploadOrchestratorBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the factory that builds one storage client per upload.
    pub fn set_factory(&mut self, factory: impl StorageClientFactory) {
        self.factory = Some(Box::new(factory));
    }

    /// Sets the broker that exchanges identity material for signing credentials.
    pub fn set_broker(&mut self, broker: impl IdentityBroker) {
        self.broker = Some(Arc::new(broker));
    }

    /// Sets the configuration provider. A snapshot is taken at the start of every upload.
    pub fn set_config(&mut self, config: Arc<dyn UploaderConfigProvider>) {
        self.config = Some(config);
    }

    #[must_use]
    pub fn build(self) -> UploadOrchestrator {
        UploadOrchestrator {
            inner: Arc::new(Inner {
                factory: self.factory.unwrap_or_else(|| Box::new(S3ClientFactory::new())),
                broker: self.broker.unwrap_or_else(|| Arc::new(CognitoIdentityBroker::new())),
                config: self.config.unwrap_or_else(|| Arc::new(StaticConfigProvider::default())),
                registry: UploadRegistry::new(),
                events: EventBridge::new(),
            }),
        }
    }
}

struct Inner {
    factory: Box<dyn StorageClientFactory>,
    broker: Arc<dyn IdentityBroker>,
    config: Arc<dyn UploaderConfigProvider>,
    registry: UploadRegistry,
    events: EventBridge,
}

/// Drives uploads and tracks them for cancellation.
///
/// Cheap to clone; clones share the registry and the event bridge.
#[derive(Clone)]
pub struct UploadOrchestrator {
    inner: Arc<Inner>,
}

impl UploadOrchestrator {
    #[must_use]
    pub fn builder() -> UploadOrchestratorBuilder {
        UploadOrchestratorBuilder::new()
    }

    /// The stream all upload events are emitted to.
    #[must_use]
    pub fn events(&self) -> &EventBridge {
        &self.inner.events
    }

    /// The in-flight uploads.
    #[must_use]
    pub fn registry(&self) -> &UploadRegistry {
        &self.inner.registry
    }

    /// Starts an upload.
    ///
    /// Returns once the transfer has been handed to the storage client; never
    /// waits for network I/O. Must be called within a Tokio runtime when the
    /// default [`S3ClientFactory`] is used.
    ///
    /// Dropping the returned [`PendingUpload`] does not cancel the upload.
    ///
    /// # Errors
    /// - [`UploadError::InvalidFile`] if the source is not an existing file
    /// - [`UploadError::InvalidRegion`] if the region cannot be resolved
    /// - [`UploadError::AlreadyInProgress`] if the upload id is in flight
    /// - [`UploadError::InitFailed`] if the storage client cannot be built
    pub fn start(&self, request: UploadRequest) -> Result<PendingUpload, UploadError> {
        let upload_id = request.upload_id().to_owned();

        if !request.source_path().is_file() {
            debug!(%upload_id, path = %request.source_path().display(), "source file missing");
            return Err(UploadError::InvalidFile(request.source_path().to_owned()));
        }
        let region = Region::resolve(request.region_name())?;
        if self.inner.registry.contains(&upload_id) {
            return Err(UploadError::AlreadyInProgress(upload_id));
        }

        let config = self.inner.config.snapshot();
        let credentials = Arc::new(CredentialSource::new(
            request.credentials().clone(),
            region,
            Arc::clone(&self.inner.broker),
        ));
        let client = self
            .inner
            .factory
            .build(region, Arc::clone(&credentials), &config)
            .map_err(|err| {
                warn!(%upload_id, %err, "failed to initialize upload");
                UploadError::InitFailed(err.to_string())
            })?;

        let handle = TransferHandle::new().with_credentials(credentials);
        self.inner
            .registry
            .insert(&upload_id, handle.clone())
            .map_err(|Occupied(id)| UploadError::AlreadyInProgress(id))?;
        debug!(%upload_id, %region, "upload registered");

        let (tx, rx) = oneshot::channel();
        let listener = Arc::new(UploadListener {
            upload_id: upload_id.clone(),
            url: request.object_url(),
            handle: handle.clone(),
            inner: Arc::clone(&self.inner),
            result: ResultCell::new(tx),
            state: Mutex::new(ListenerState::default()),
        });

        let job = TransferJob {
            upload_id: upload_id.clone(),
            bucket: request.bucket().to_owned(),
            key: request.destination_key().to_owned(),
            source_path: request.source_path().to_owned(),
            content_type: request
                .content_type()
                .map_or_else(|| config.default_content_type.clone(), str::to_owned),
        };
        client.start_transfer(job, handle.token().clone(), listener);
        info!(%upload_id, bucket = request.bucket(), key = request.destination_key(), "upload started");

        Ok(PendingUpload { upload_id, rx })
    }

    /// Starts an upload and waits for its result.
    ///
    /// # Errors
    /// Any error of [`start`](Self::start), or the transfer's terminal error.
    pub async fn upload(&self, request: UploadRequest) -> UploadResult {
        self.start(request)?.await
    }

    /// Cancels an in-flight upload. Unknown or finished ids are ignored.
    pub fn cancel(&self, upload_id: &str) {
        if self.cancel_entry(upload_id) {
            info!(upload_id, "upload cancelled");
        } else {
            debug!(upload_id, "cancel ignored, upload not in flight");
        }
    }

    /// Cancels every in-flight upload and returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for upload_id in self.inner.registry.ids() {
            if self.cancel_entry(&upload_id) {
                debug!(%upload_id, "upload cancelled");
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Fires the token before releasing the entry, so no progress slips out in between.
    fn cancel_entry(&self, upload_id: &str) -> bool {
        let Some(handle) = self.inner.registry.lookup(upload_id) else {
            return false;
        };
        handle.cancel();
        self.inner.registry.remove_if_current(upload_id, &handle).is_some()
    }

    /// Pushes a newer token into the credential source of an in-flight upload.
    ///
    /// Returns `false` if the upload is not in flight or either value is empty.
    pub fn update_credentials(&self, upload_id: &str, token: impl Into<String>, identity_id: impl Into<String>) -> bool {
        let (token, identity_id) = (token.into(), identity_id.into());
        if token.trim().is_empty() || identity_id.trim().is_empty() {
            warn!(upload_id, "empty credential update rejected");
            return false;
        }
        let Some(handle) = self.inner.registry.lookup(upload_id) else {
            return false;
        };
        match handle.credentials() {
            Some(credentials) => {
                credentials.update(token, identity_id);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for UploadOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOrchestrator")
            .field("in_flight", &self.inner.registry.len())
            .field("events", &self.inner.events)
            .finish_non_exhaustive()
    }
}

/// The eventual result of a started upload: the object URL or an error.
#[must_use = "dropping a pending upload does not cancel it"]
#[derive(Debug)]
pub struct PendingUpload {
    upload_id: String,
    rx: oneshot::Receiver<UploadResult>,
}

impl PendingUpload {
    #[must_use]
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }
}

impl Future for PendingUpload {
    type Output = UploadResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.unwrap_or_else(|_| Err(UploadError::Transfer(String::from(TRANSFER_ABANDONED))))
        })
    }
}

/// Returned by [`ResultCell::resolve`] on the second write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AlreadyResolved;

/// Single-assignment slot for the result of one upload.
struct ResultCell(Mutex<Option<oneshot::Sender<UploadResult>>>);

impl ResultCell {
    fn new(tx: oneshot::Sender<UploadResult>) -> Self {
        Self(Mutex::new(Some(tx)))
    }

    fn resolve(&self, result: UploadResult) -> Result<(), AlreadyResolved> {
        let tx = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(AlreadyResolved)?;
        // The caller may have dropped its `PendingUpload`.
        let _ = tx.send(result);
        Ok(())
    }
}

#[derive(Default)]
struct ListenerState {
    last_percent: Option<u8>,
    finished: bool,
}

/// Turns the callbacks of one transfer into events and its result.
struct UploadListener {
    upload_id: String,
    url: String,
    handle: TransferHandle,
    inner: Arc<Inner>,
    result: ResultCell,
    state: Mutex<ListenerState>,
}

impl UploadListener {
    fn state(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, result: UploadResult) {
        if self.result.resolve(result).is_err() {
            warn!(upload_id = %self.upload_id, "upload result already resolved");
        }
    }

    fn is_registered(&self) -> bool {
        self.inner.registry.lookup(&self.upload_id).as_ref() == Some(&self.handle)
    }

    /// Takes the upload out of the registry. `false` if a cancel got there first.
    fn finalize(&self) -> bool {
        self.inner
            .registry
            .remove_if_current(&self.upload_id, &self.handle)
            .is_some()
    }
}

impl TransferListener for UploadListener {
    fn on_progress(&self, bytes_current: u64, bytes_total: u64) {
        let mut state = self.state();
        if state.finished || self.handle.is_cancelled() || !self.is_registered() {
            return;
        }
        let progress = percent(bytes_current, bytes_total);
        if state.last_percent.is_some_and(|last| progress <= last) {
            return;
        }
        state.last_percent = Some(progress);
        trace!(upload_id = %self.upload_id, bytes_current, bytes_total, progress, "upload progress");
        self.inner.events.emit(UploadEvent::Progress {
            upload_id: self.upload_id.clone(),
            progress,
        });
    }

    fn on_completed(&self) {
        let mut state = self.state();
        if std::mem::replace(&mut state.finished, true) {
            return;
        }
        if !self.finalize() {
            debug!(upload_id = %self.upload_id, "completion after cancel suppressed");
            self.resolve(Err(UploadError::Cancelled));
            return;
        }
        self.inner.events.emit(UploadEvent::Completed {
            upload_id: self.upload_id.clone(),
            url: self.url.clone(),
        });
        self.resolve(Ok(self.url.clone()));
    }

    fn on_failed(&self, error: TransferError) {
        let mut state = self.state();
        if std::mem::replace(&mut state.finished, true) {
            return;
        }
        if !self.finalize() {
            debug!(upload_id = %self.upload_id, %error, "failure after cancel suppressed");
            self.resolve(Err(UploadError::Cancelled));
            return;
        }
        let message = error.to_string();
        self.inner.events.emit(UploadEvent::Failed {
            upload_id: self.upload_id.clone(),
            error: Some(message.clone()),
        });
        self.resolve(Err(UploadError::Transfer(message)));
    }

    fn on_cancelled(&self) {
        let mut state = self.state();
        if std::mem::replace(&mut state.finished, true) {
            return;
        }
        self.finalize();
        self.resolve(Err(UploadError::Cancelled));
    }
}

impl Drop for UploadListener {
    fn drop(&mut self) {
        let finished = self.state.get_mut().map_or_else(|e| e.into_inner().finished, |s| s.finished);
        if finished {
            return;
        }
        if !self.finalize() {
            self.resolve(Err(UploadError::Cancelled));
            return;
        }
        warn!(upload_id = %self.upload_id, "transfer dropped without a terminal callback");
        let message = String::from(TRANSFER_ABANDONED);
        self.inner.events.emit(UploadEvent::Failed {
            upload_id: self.upload_id.clone(),
            error: Some(message.clone()),
        });
        self.resolve(Err(UploadError::Transfer(message)));
    }
}
