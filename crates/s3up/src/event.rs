//! Upload event stream
//!
//! The [`EventBridge`] forwards [`UploadEvent`]s of every upload to a single
//! observer. Subscribing replaces the previous observer; events emitted while
//! nobody is subscribed are dropped.
//!
//! # Example
//! ```
//! use s3up::event::{EventBridge, UploadEvent};
//!
//! let bridge = EventBridge::new();
//! let mut rx = bridge.channel();
//!
//! bridge.emit(UploadEvent::Progress { upload_id: "u-1".into(), progress: 50 });
//! assert_eq!(rx.try_recv().unwrap().upload_id(), "u-1");
//!
//! bridge.unsubscribe();
//! bridge.emit(UploadEvent::Progress { upload_id: "u-1".into(), progress: 60 });
//! assert!(rx.try_recv().is_err());
//! ```

use arc_swap::ArcSwapOption;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

/// An entry of the outbound event stream.
///
/// Serializes to `{"uploadId": .., "status": "progress" | "completed" | "failed", ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UploadEvent {
    Progress {
        #[serde(rename = "uploadId")]
        upload_id: String,
        progress: u8,
    },
    Completed {
        #[serde(rename = "uploadId")]
        upload_id: String,
        url: String,
    },
    Failed {
        #[serde(rename = "uploadId")]
        upload_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl UploadEvent {
    #[must_use]
    pub fn upload_id(&self) -> &str {
        match self {
            Self::Progress { upload_id, .. } | Self::Completed { upload_id, .. } | Self::Failed { upload_id, .. } => {
                upload_id
            }
        }
    }

    /// `true` for `Completed` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Receives upload events.
///
/// Called from transfer callbacks; must not block.
pub trait EventObserver: Send + Sync + 'static {
    fn on_event(&self, event: UploadEvent);
}

impl EventObserver for mpsc::UnboundedSender<UploadEvent> {
    fn on_event(&self, event: UploadEvent) {
        if self.send(event).is_err() {
            trace!("event receiver closed");
        }
    }
}

impl<F> EventObserver for F
where
    F: Fn(UploadEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: UploadEvent) {
        self(event);
    }
}

struct Observer(Box<dyn EventObserver>);

/// Fan-in of all upload events onto one observer.
#[derive(Default)]
pub struct EventBridge {
    observer: ArcSwapOption<Observer>,
}

impl EventBridge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `observer`, replacing any previous one.
    pub fn subscribe(&self, observer: impl EventObserver) {
        self.observer.store(Some(std::sync::Arc::new(Observer(Box::new(observer)))));
    }

    /// Subscribes an unbounded channel and returns its receiving end.
    pub fn channel(&self) -> mpsc::UnboundedReceiver<UploadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(tx);
        rx
    }

    /// Detaches the current observer, if any.
    pub fn unsubscribe(&self) {
        self.observer.store(None);
    }

    #[must_use]
    pub fn has_observer(&self) -> bool {
        self.observer.load().is_some()
    }

    /// Delivers `event` to the current observer, or drops it.
    pub fn emit(&self, event: UploadEvent) {
        match self.observer.load().as_ref() {
            Some(observer) => observer.0.on_event(event),
            None => trace!(upload_id = event.upload_id(), "no observer, event dropped"),
        }
    }
}

impl std::fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBridge")
            .field("has_observer", &self.has_observer())
            .finish()
    }
}
