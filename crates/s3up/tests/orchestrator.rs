//! Behavior of the orchestrator against a scripted storage client.
//!
//! The scripted client never moves bytes. Each test plays the transfer side by
//! hand through the captured [`TransferListener`], so event ordering is fully
//! deterministic.

use s3up::config::{HotReloadConfigProvider, UploaderConfig, UploaderConfigProvider};
use s3up::credential::{CredentialSource, StaticIdentityBroker};
use s3up::region::Region;
use s3up::request::StartUploadArgs;
use s3up::transfer::{InitError, StorageClient, StorageClientFactory, TransferError, TransferJob, TransferListener};
use s3up::{ErrorKind, UploadError, UploadEvent, UploadOrchestrator};

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use aws_credential_types::Credentials;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Clone)]
struct Scripted {
    job: TransferJob,
    cancel: CancellationToken,
    listener: Arc<dyn TransferListener>,
    credentials: Arc<CredentialSource>,
}

impl Scripted {
    fn progress(&self, current: u64, total: u64) {
        self.listener.on_progress(current, total);
    }

    fn complete(&self) {
        self.listener.on_completed();
    }

    fn fail(&self, message: &str) {
        self.listener.on_failed(TransferError::Storage(message.into()));
    }

    fn acknowledge_cancel(&self) {
        assert!(self.cancel.is_cancelled());
        self.listener.on_cancelled();
    }
}

type Transfers = Arc<Mutex<Vec<Scripted>>>;

#[derive(Default)]
struct ScriptedFactory {
    transfers: Transfers,
    builds: Arc<AtomicUsize>,
    fail_init: Option<String>,
}

struct ScriptedClient {
    transfers: Transfers,
    credentials: Arc<CredentialSource>,
}

impl StorageClientFactory for ScriptedFactory {
    fn build(
        &self,
        _region: Region,
        credentials: Arc<CredentialSource>,
        _config: &UploaderConfig,
    ) -> Result<Arc<dyn StorageClient>, InitError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_init {
            return Err(InitError::new(message.clone()));
        }
        Ok(Arc::new(ScriptedClient {
            transfers: Arc::clone(&self.transfers),
            credentials,
        }))
    }
}

impl StorageClient for ScriptedClient {
    fn start_transfer(&self, job: TransferJob, cancel: CancellationToken, listener: Arc<dyn TransferListener>) {
        self.transfers.lock().unwrap().push(Scripted {
            job,
            cancel,
            listener,
            credentials: Arc::clone(&self.credentials),
        });
    }
}

struct Harness {
    orchestrator: UploadOrchestrator,
    transfers: Transfers,
    builds: Arc<AtomicUsize>,
    events: UnboundedReceiver<UploadEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::with_factory(ScriptedFactory::default(), None)
    }

    fn with_factory(factory: ScriptedFactory, config: Option<Arc<dyn UploaderConfigProvider>>) -> Self {
        let transfers = Arc::clone(&factory.transfers);
        let builds = Arc::clone(&factory.builds);

        let mut builder = UploadOrchestrator::builder();
        builder.set_factory(factory);
        builder.set_broker(StaticIdentityBroker::new(Credentials::for_tests()));
        if let Some(config) = config {
            builder.set_config(config);
        }
        let orchestrator = builder.build();
        let events = orchestrator.events().channel();

        Self {
            orchestrator,
            transfers,
            builds,
            events,
        }
    }

    fn transfer(&self, upload_id: &str) -> Scripted {
        let transfers = self.transfers.lock().unwrap();
        transfers
            .iter()
            .rev()
            .find(|t| t.job.upload_id == upload_id)
            .cloned()
            .unwrap()
    }

    fn transfer_count(&self) -> usize {
        self.transfers.lock().unwrap().len()
    }

    fn drain_events(&mut self) -> Vec<UploadEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn source_file() -> PathBuf {
    let dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("s3up-orchestrator-tests");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(Uuid::new_v4().to_string());
    fs::write(&path, b"hello world\n").unwrap();
    path
}

fn args(upload_id: &str) -> StartUploadArgs {
    StartUploadArgs {
        upload_id: upload_id.into(),
        bucket: "my-bucket".into(),
        source_path: source_file().to_string_lossy().into_owned(),
        file_name: "a.jpg".into(),
        upload_folder: "images".into(),
        region: "us-east-1".into(),
        token: "token-1".into(),
        identity_id: "us-east-1:identity".into(),
        provider_name: "login.example.com".into(),
        ..Default::default()
    }
}

fn progress(upload_id: &str, progress: u8) -> UploadEvent {
    UploadEvent::Progress {
        upload_id: upload_id.into(),
        progress,
    }
}

#[tokio::test]
async fn registers_before_any_progress() {
    let mut h = Harness::new();
    let _pending = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();

    assert!(h.orchestrator.registry().contains("u-1"));
    assert_eq!(h.orchestrator.registry().len(), 1);
    assert!(h.drain_events().is_empty());

    h.transfer("u-1").progress(0, 1000);
    assert_eq!(h.drain_events(), [progress("u-1", 0)]);
}

#[tokio::test]
async fn progress_is_non_decreasing() {
    let mut h = Harness::new();
    let _pending = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    let t = h.transfer("u-1");

    t.progress(0, 1000);
    t.progress(500, 1000);
    t.progress(400, 1000);
    t.progress(500, 1000);
    t.progress(1000, 1000);

    assert_eq!(h.drain_events(), [progress("u-1", 0), progress("u-1", 50), progress("u-1", 100)]);
}

#[tokio::test]
async fn unknown_total_reports_zero() {
    let mut h = Harness::new();
    let _pending = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    h.transfer("u-1").progress(42, 0);
    assert_eq!(h.drain_events(), [progress("u-1", 0)]);
}

#[tokio::test]
async fn completion_resolves_once_and_emits_once() {
    let mut h = Harness::new();
    let pending = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    assert_eq!(pending.upload_id(), "u-1");

    let t = h.transfer("u-1");
    assert_eq!(t.job.key, "images/a.jpg");
    assert_eq!(t.job.bucket, "my-bucket");

    t.progress(1000, 1000);
    t.complete();
    t.complete();
    t.fail("late");

    let url = "https://my-bucket.s3.us-east-1.amazonaws.com/images/a.jpg";
    assert_eq!(pending.await, Ok(url.to_owned()));
    assert_eq!(
        h.drain_events(),
        [
            progress("u-1", 100),
            UploadEvent::Completed {
                upload_id: "u-1".into(),
                url: url.into(),
            }
        ]
    );
    assert!(h.orchestrator.registry().is_empty());
}

#[tokio::test]
async fn failure_rejects_result_and_emits_failed() {
    let mut h = Harness::new();
    let pending = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    let t = h.transfer("u-1");

    t.progress(10, 100);
    t.fail("connection reset");
    t.complete();

    let err = pending.await.unwrap_err();
    assert_eq!(err.code().as_str(), "UPLOAD_FAILED");
    assert_eq!(err.kind(), ErrorKind::Transfer);
    assert_eq!(
        h.drain_events(),
        [
            progress("u-1", 10),
            UploadEvent::Failed {
                upload_id: "u-1".into(),
                error: Some("connection reset".into()),
            }
        ]
    );
    assert!(h.orchestrator.registry().is_empty());
}

#[tokio::test]
async fn cancel_truncates_events_without_terminal() {
    let mut h = Harness::new();
    let pending = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    let t = h.transfer("u-1");
    t.progress(10, 100);

    h.orchestrator.cancel("u-1");
    assert!(!h.orchestrator.registry().contains("u-1"));

    t.progress(20, 100);
    t.acknowledge_cancel();

    assert_eq!(pending.await, Err(UploadError::Cancelled));
    assert_eq!(h.drain_events(), [progress("u-1", 10)]);

    h.orchestrator.cancel("u-1");
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn cancel_unknown_is_silent() {
    let mut h = Harness::new();
    h.orchestrator.cancel("never-started");
    h.orchestrator.cancel("never-started");
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn cancel_after_completion_is_silent() {
    let mut h = Harness::new();
    let pending = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    h.transfer("u-1").complete();
    assert!(pending.await.is_ok());
    h.drain_events();

    h.orchestrator.cancel("u-1");
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn completion_after_cancel_is_suppressed() {
    let mut h = Harness::new();
    let pending = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    let t = h.transfer("u-1");

    h.orchestrator.cancel("u-1");
    // The transfer finished before it observed the token.
    t.complete();

    assert_eq!(pending.await, Err(UploadError::Cancelled));
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn stale_transfer_never_evicts_reused_id() {
    let mut h = Harness::new();
    let first = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    let stale = h.transfer("u-1");
    h.orchestrator.cancel("u-1");

    let second = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    let fresh = h.transfer("u-1");
    assert_eq!(h.transfer_count(), 2);

    stale.complete();
    assert_eq!(first.await, Err(UploadError::Cancelled));
    assert!(h.orchestrator.registry().contains("u-1"));

    fresh.complete();
    assert!(second.await.is_ok());
    assert_eq!(h.drain_events().len(), 1);
}

#[tokio::test]
async fn missing_field_is_rejected_before_any_interaction() {
    let mut a = args("u-1");
    a.token = String::new();
    let err = a.into_request().unwrap_err();
    assert_eq!(err, UploadError::InvalidArgs("token"));
    assert_eq!(err.code().as_str(), "INVALID_ARGS");

    let mut a = args("u-1");
    a.region = "  ".into();
    assert_eq!(a.into_request().unwrap_err(), UploadError::InvalidArgs("region"));
}

#[tokio::test]
async fn missing_file_is_rejected() {
    let mut h = Harness::new();
    let mut a = args("u-1");
    a.source_path = "/definitely/not/here.jpg".into();

    let err = h.orchestrator.start(a.into_request().unwrap()).unwrap_err();
    assert_eq!(err.code().as_str(), "INVALID_FILE");
    assert_eq!(err.kind(), ErrorKind::Input);
    assert_eq!(h.builds.load(Ordering::SeqCst), 0);
    assert!(h.orchestrator.registry().is_empty());
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn unknown_region_never_creates_a_handle() {
    let mut h = Harness::new();
    let mut a = args("u-1");
    a.region = "mars-1".into();

    let err = h.orchestrator.start(a.into_request().unwrap()).unwrap_err();
    assert_eq!(err.code().as_str(), "INVALID_REGION");
    assert_eq!(h.builds.load(Ordering::SeqCst), 0);
    assert!(h.orchestrator.registry().is_empty());
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn region_is_case_insensitive() {
    let h = Harness::new();
    let mut a = args("u-1");
    a.region = "US-EAST-1".into();

    let _pending = h.orchestrator.start(a.into_request().unwrap()).unwrap();
    let t = h.transfer("u-1");
    assert_eq!(t.credentials.region().as_str(), "us-east-1");
}

#[tokio::test]
async fn init_failure_is_immediate() {
    let factory = ScriptedFactory {
        fail_init: Some("no client for you".into()),
        ..Default::default()
    };
    let mut h = Harness::with_factory(factory, None);

    let err = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap_err();
    assert_eq!(err, UploadError::InitFailed("no client for you".into()));
    assert_eq!(err.kind(), ErrorKind::Initialization);
    assert!(h.orchestrator.registry().is_empty());
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn duplicate_in_flight_id_is_rejected() {
    let h = Harness::new();
    let _pending = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();

    let err = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap_err();
    assert_eq!(err.code().as_str(), "UPLOAD_IN_PROGRESS");
    assert_eq!(h.transfer_count(), 1);
}

#[tokio::test]
async fn uploads_use_independent_credentials() {
    let h = Harness::new();
    let mut b = args("u-2");
    b.token = "token-2".into();

    let _a = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    let _b = h.orchestrator.start(b.into_request().unwrap()).unwrap();

    assert_eq!(h.transfer("u-1").credentials.current_token(), "token-1");
    assert_eq!(h.transfer("u-2").credentials.current_token(), "token-2");
}

#[tokio::test]
async fn update_credentials_reaches_in_flight_upload() {
    let h = Harness::new();
    let _pending = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    let credentials = h.transfer("u-1").credentials;

    assert!(h.orchestrator.update_credentials("u-1", "token-2", "us-east-1:other"));
    assert_eq!(credentials.refresh(), "token-2");
    assert_eq!(credentials.current_identity_id(), "us-east-1:other");
    assert_eq!(credentials.provider_name(), "login.example.com");

    assert!(!h.orchestrator.update_credentials("unknown", "t", "i"));
}

#[tokio::test]
async fn cancel_all_cancels_everything() {
    let h = Harness::new();
    let a = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    let b = h.orchestrator.start(args("u-2").into_request().unwrap()).unwrap();

    assert_eq!(h.orchestrator.cancel_all(), 2);
    assert!(h.orchestrator.registry().is_empty());

    h.transfer("u-1").acknowledge_cancel();
    h.transfer("u-2").acknowledge_cancel();
    assert_eq!(a.await, Err(UploadError::Cancelled));
    assert_eq!(b.await, Err(UploadError::Cancelled));
}

#[tokio::test]
async fn content_type_defaults_to_config() {
    let config = HotReloadConfigProvider::default();
    let mut updated = UploaderConfig::default();
    updated.default_content_type = "image/jpeg".into();
    config.update(Arc::new(updated));

    let h = Harness::with_factory(ScriptedFactory::default(), Some(Arc::new(config)));

    let _a = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    assert_eq!(h.transfer("u-1").job.content_type, "image/jpeg");

    let mut b = args("u-2");
    b.content_type = Some("image/png".into());
    let _b = h.orchestrator.start(b.into_request().unwrap()).unwrap();
    assert_eq!(h.transfer("u-2").job.content_type, "image/png");
}

#[tokio::test]
async fn events_are_dropped_without_observer() {
    let mut h = Harness::new();
    let pending = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    let t = h.transfer("u-1");

    h.orchestrator.events().unsubscribe();
    t.progress(50, 100);
    t.complete();

    assert!(pending.await.is_ok());
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn no_progress_once_entry_is_released() {
    let mut h = Harness::new();
    let _pending = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    let t = h.transfer("u-1");
    t.progress(10, 100);

    // Entry gone while the token has not fired yet.
    assert!(h.orchestrator.registry().remove("u-1").is_some());
    assert!(!t.cancel.is_cancelled());
    t.progress(50, 100);

    assert_eq!(h.drain_events(), [progress("u-1", 10)]);
}

#[tokio::test]
async fn cancel_fires_token_before_release() {
    let mut h = Harness::new();
    let _pending = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    let t = h.transfer("u-1");

    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        let cancel = t.cancel.clone();
        let orchestrator = h.orchestrator.clone();
        h.orchestrator.events().subscribe(move |_: UploadEvent| {
            seen.lock()
                .unwrap()
                .push((cancel.is_cancelled(), orchestrator.registry().contains("u-1")));
        });
    }

    h.orchestrator.cancel("u-1");
    assert!(t.cancel.is_cancelled());
    assert!(!h.orchestrator.registry().contains("u-1"));
    t.progress(50, 100);

    assert!(seen.lock().unwrap().is_empty());
    h.orchestrator.events().unsubscribe();
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn abandoned_transfer_emits_failed() {
    let mut h = Harness::new();
    let pending = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    h.transfer("u-1").progress(30, 100);

    // The transfer task went away without reporting back.
    h.transfers.lock().unwrap().clear();

    let err = pending.await.unwrap_err();
    assert_eq!(err.code().as_str(), "UPLOAD_FAILED");
    assert!(h.orchestrator.registry().is_empty());

    let events = h.drain_events();
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[1], UploadEvent::Failed { upload_id, error: Some(_) } if upload_id == "u-1"));
}

#[tokio::test]
async fn empty_credential_update_is_rejected() {
    let h = Harness::new();
    let _pending = h.orchestrator.start(args("u-1").into_request().unwrap()).unwrap();
    let credentials = h.transfer("u-1").credentials;

    assert!(!h.orchestrator.update_credentials("u-1", "", "us-east-1:other"));
    assert!(!h.orchestrator.update_credentials("u-1", "token-2", "  "));
    assert_eq!(credentials.current_token(), "token-1");
    assert_eq!(credentials.current_identity_id(), "us-east-1:identity");
}

#[tokio::test]
async fn padded_region_yields_clean_url() {
    let mut h = Harness::new();
    let mut a = args("u-1");
    a.region = " us-east-1 ".into();

    let pending = h.orchestrator.start(a.into_request().unwrap()).unwrap();
    h.transfer("u-1").complete();

    let url = "https://my-bucket.s3.us-east-1.amazonaws.com/images/a.jpg";
    assert_eq!(pending.await, Ok(url.to_owned()));
    assert!(matches!(h.drain_events().last(), Some(UploadEvent::Completed { url: u, .. }) if u == url));
}
