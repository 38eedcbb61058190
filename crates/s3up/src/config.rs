//! Uploader configuration
//!
//! This module provides the tunable parameters of the upload pipeline.
//!
//! # Features
//! - `serde` support for serialization/deserialization
//! - Default values for all parameters
//! - Static configuration via [`StaticConfigProvider`]
//! - Hot-reload configuration via [`HotReloadConfigProvider`]
//!
//! The orchestrator takes one snapshot per upload, so an update only affects
//! uploads started after it.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use s3up::config::{UploaderConfig, UploaderConfigProvider, HotReloadConfigProvider};
//!
//! let provider = HotReloadConfigProvider::default();
//! assert_eq!(provider.snapshot().part_size, 8 * 1024 * 1024);
//!
//! let mut config = UploaderConfig::default();
//! config.max_concurrent_parts = 8;
//! provider.update(Arc::new(config));
//! assert_eq!(provider.snapshot().max_concurrent_parts, 8);
//! ```

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// Smallest part size accepted by S3 for every part but the last.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Uploader configuration provider.
///
/// Built-in providers:
/// - [`StaticConfigProvider`] - Immutable configuration (default if not set)
/// - [`HotReloadConfigProvider`] - Runtime-updatable configuration
pub trait UploaderConfigProvider: Send + Sync + 'static {
    /// Returns a snapshot of the current configuration.
    fn snapshot(&self) -> Arc<UploaderConfig>;
}

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct UploaderConfig {
    /// Size of each multipart part in bytes. Files not larger than this are
    /// sent with a single `PutObject`.
    ///
    /// Values below [`MIN_PART_SIZE`] are raised to it.
    ///
    /// Default: 8 MB (8 * 1024 * 1024)
    pub part_size: u64,

    /// Maximum number of parts of one upload in flight at the same time.
    ///
    /// Default: 4
    pub max_concurrent_parts: usize,

    /// Custom endpoint for S3-compatible services.
    ///
    /// Default: `None` (the regional AWS endpoint)
    pub endpoint_url: Option<String>,

    /// Use path-style addressing instead of virtual-hosted-style.
    ///
    /// Default: `false`
    pub force_path_style: bool,

    /// Content type used when the request does not name one.
    ///
    /// Default: `application/octet-stream`
    pub default_content_type: String,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            part_size: 8 * 1024 * 1024,
            max_concurrent_parts: 4,
            endpoint_url: None,
            force_path_style: false,
            default_content_type: String::from("application/octet-stream"),
        }
    }
}

impl UploaderConfig {
    /// The part size actually used for multipart uploads.
    #[must_use]
    pub fn effective_part_size(&self) -> u64 {
        self.part_size.max(MIN_PART_SIZE)
    }

    /// The part concurrency actually used, at least one.
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrent_parts.max(1)
    }
}

/// Static configuration provider.
///
/// Use this when configuration does not need to be updated at runtime.
#[derive(Debug)]
pub struct StaticConfigProvider {
    inner: Arc<UploaderConfig>,
}

impl StaticConfigProvider {
    /// Creates a new static configuration provider.
    #[must_use]
    pub fn new(config: Arc<UploaderConfig>) -> Self {
        Self { inner: config }
    }
}

impl Default for StaticConfigProvider {
    fn default() -> Self {
        Self::new(Arc::new(UploaderConfig::default()))
    }
}

impl UploaderConfigProvider for StaticConfigProvider {
    fn snapshot(&self) -> Arc<UploaderConfig> {
        Arc::clone(&self.inner)
    }
}

/// Hot-reload configuration provider.
///
/// Lock-free reads and atomic updates through `ArcSwap`.
#[derive(Debug)]
pub struct HotReloadConfigProvider {
    inner: ArcSwap<UploaderConfig>,
}

impl HotReloadConfigProvider {
    /// Creates a new hot-reload configuration provider.
    #[must_use]
    pub fn new(config: Arc<UploaderConfig>) -> Self {
        Self {
            inner: ArcSwap::from(config),
        }
    }

    /// Replaces the entire configuration atomically.
    pub fn update(&self, config: Arc<UploaderConfig>) {
        self.inner.store(config);
    }
}

impl Default for HotReloadConfigProvider {
    fn default() -> Self {
        Self::new(Arc::new(UploaderConfig::default()))
    }
}

impl UploaderConfigProvider for HotReloadConfigProvider {
    fn snapshot(&self) -> Arc<UploaderConfig> {
        self.inner.load_full()
    }
}
