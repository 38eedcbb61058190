//! Upload requests
//!
//! [`StartUploadArgs`] and [`CancelUploadArgs`] mirror the method-call
//! arguments sent by the host application. [`StartUploadArgs::into_request`]
//! turns the former into a validated [`UploadRequest`].
//!
//! # Example
//! ```
//! use s3up::request::StartUploadArgs;
//!
//! let args: StartUploadArgs = serde_json::from_value(serde_json::json!({
//!     "uploadId": "u-1",
//!     "bucket": "my-bucket",
//!     "sourcePath": "/tmp/a.jpg",
//!     "fileName": "a.jpg",
//!     "uploadFolder": "images",
//!     "region": "us-east-1",
//!     "token": "t",
//!     "identityId": "us-east-1:abc",
//!     "providerName": "login.example.com",
//! })).unwrap();
//!
//! let request = args.into_request().unwrap();
//! assert_eq!(request.destination_key(), "images/a.jpg");
//! assert_eq!(request.object_url(), "https://my-bucket.s3.us-east-1.amazonaws.com/images/a.jpg");
//! ```

use crate::credential::CredentialMaterial;
use crate::error::UploadError;

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Raw `startUpload` arguments.
///
/// Missing keys deserialize as empty strings so that validation can report
/// them uniformly.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartUploadArgs {
    pub upload_id: String,
    #[serde(alias = "bucketName")]
    pub bucket: String,
    #[serde(alias = "filePath")]
    pub source_path: String,
    pub file_name: String,
    #[serde(alias = "imageUploadFolder")]
    pub upload_folder: String,
    pub region: String,
    pub identity_pool_id: Option<String>,
    #[serde(alias = "awsToken")]
    pub token: String,
    pub identity_id: String,
    pub provider_name: String,
    pub content_type: Option<String>,
}

/// Raw `cancelUpload` arguments.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CancelUploadArgs {
    pub upload_id: String,
}

impl StartUploadArgs {
    /// Validates that every required field is non-empty.
    ///
    /// Surrounding whitespace is stripped from the fields that end up in the
    /// object key and URL. File existence and region support are checked
    /// later by the orchestrator.
    ///
    /// # Errors
    /// Returns [`UploadError::InvalidArgs`] naming the first empty field.
    pub fn into_request(mut self) -> Result<UploadRequest, UploadError> {
        for field in [
            &mut self.bucket,
            &mut self.file_name,
            &mut self.upload_folder,
            &mut self.region,
        ] {
            trim_in_place(field);
        }

        let required = [
            ("uploadId", &self.upload_id),
            ("bucket", &self.bucket),
            ("sourcePath", &self.source_path),
            ("fileName", &self.file_name),
            ("uploadFolder", &self.upload_folder),
            ("region", &self.region),
            ("token", &self.token),
            ("identityId", &self.identity_id),
            ("providerName", &self.provider_name),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(UploadError::InvalidArgs(*name));
        }

        let destination_key = format!("{}/{}", self.upload_folder, self.file_name);
        let credentials = CredentialMaterial::new(self.token, self.identity_id, self.provider_name)
            .with_identity_pool_id(self.identity_pool_id.filter(|s| !s.is_empty()));

        Ok(UploadRequest {
            upload_id: self.upload_id,
            bucket: self.bucket,
            source_path: PathBuf::from(self.source_path),
            destination_key,
            region_name: self.region,
            content_type: self.content_type.filter(|s| !s.is_empty()),
            credentials,
        })
    }
}

fn trim_in_place(s: &mut String) {
    let trimmed = s.trim();
    if trimmed.len() != s.len() {
        *s = trimmed.to_owned();
    }
}

/// A validated upload request.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    upload_id: String,
    bucket: String,
    source_path: PathBuf,
    destination_key: String,
    region_name: String,
    content_type: Option<String>,
    credentials: CredentialMaterial,
}

impl UploadRequest {
    #[must_use]
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    #[must_use]
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// `{uploadFolder}/{fileName}`.
    #[must_use]
    pub fn destination_key(&self) -> &str {
        &self.destination_key
    }

    /// The region name exactly as supplied by the caller.
    #[must_use]
    pub fn region_name(&self) -> &str {
        &self.region_name
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialMaterial {
        &self.credentials
    }

    /// The public URL of the uploaded object.
    ///
    /// Built from the bucket and region name of the request, never re-resolved.
    #[must_use]
    pub fn object_url(&self) -> String {
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket, self.region_name, self.destination_key
        )
    }
}
