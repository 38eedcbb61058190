//! Cancellable, observable S3 uploads
//!
//! `s3up` uploads local files to S3 buckets using short-lived credentials
//! obtained from a developer-authenticated identity token. Each upload is
//! tracked by a caller-supplied id, can be cancelled at any time, and reports
//! progress and its terminal state on a single event stream.
//!
//! # Architecture
//!
//! - [`request`] decodes and validates the host's arguments into an [`UploadRequest`]
//! - [`region`] resolves region names against the supported set
//! - [`credential`] keeps the identity material of one upload refreshable
//! - [`transfer`] abstracts the storage client; [`s3`] implements it with `aws-sdk-s3`
//! - [`registry`] tracks in-flight uploads for cancellation
//! - [`event`] forwards progress and terminal events to one observer
//! - [`orchestrator`] ties the above together
//!
//! # Getting Started
//!
//! ```rust,no_run
//! use s3up::UploadOrchestrator;
//! use s3up::request::StartUploadArgs;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = UploadOrchestrator::builder().build();
//!     let args: StartUploadArgs = serde_json::from_str(&std::fs::read_to_string("args.json")?)?;
//!     let url = orchestrator.upload(args.into_request()?).await?;
//!     println!("{url}");
//!     Ok(())
//! }
//! ```

#![allow(
    clippy::module_name_repetitions,
    clippy::single_match_else,
    clippy::multiple_crate_versions, // Sometimes not fixable
)]

pub mod config;
pub mod credential;
pub mod event;
pub mod orchestrator;
pub mod region;
pub mod registry;
pub mod request;
pub mod s3;
pub mod transfer;

mod error;

pub use self::error::*;
pub use self::event::UploadEvent;
pub use self::orchestrator::{PendingUpload, UploadOrchestrator, UploadOrchestratorBuilder};
pub use self::region::Region;
pub use self::request::UploadRequest;
