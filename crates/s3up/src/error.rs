use crate::region::RegionError;

use std::fmt;
use std::path::PathBuf;

/// Result type of upload operations.
pub type UploadResult<T = String> = Result<T, UploadError>;

/// Stable error codes reported to the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum UploadErrorCode {
    InvalidArgs,
    InvalidFile,
    InvalidRegion,
    UploadInProgress,
    UploadInitFailed,
    UploadFailed,
    UploadCancelled,
}

impl UploadErrorCode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgs => "INVALID_ARGS",
            Self::InvalidFile => "INVALID_FILE",
            Self::InvalidRegion => "INVALID_REGION",
            Self::UploadInProgress => "UPLOAD_IN_PROGRESS",
            Self::UploadInitFailed => "UPLOAD_INIT_FAILED",
            Self::UploadFailed => "UPLOAD_FAILED",
            Self::UploadCancelled => "UPLOAD_CANCELLED",
        }
    }
}

impl fmt::Display for UploadErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of [`UploadError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad caller input. Detected synchronously, never retried.
    Input,
    /// Credential or client construction failed before any transfer started.
    Initialization,
    /// The in-flight transfer failed.
    Transfer,
    /// The upload was cancelled by the caller.
    Cancellation,
}

/// Caller-facing upload error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum UploadError {
    #[error("Missing required arguments for upload: `{0}` is empty")]
    InvalidArgs(&'static str),

    #[error("File does not exist at path: {}", .0.display())]
    InvalidFile(PathBuf),

    #[error(transparent)]
    InvalidRegion(#[from] RegionError),

    #[error("An upload with id {0:?} is already in progress")]
    AlreadyInProgress(String),

    #[error("Failed to initialize upload: {0}")]
    InitFailed(String),

    #[error("Upload failed: {0}")]
    Transfer(String),

    #[error("Upload was cancelled")]
    Cancelled,
}

impl UploadError {
    #[must_use]
    pub fn code(&self) -> UploadErrorCode {
        match self {
            Self::InvalidArgs(_) => UploadErrorCode::InvalidArgs,
            Self::InvalidFile(_) => UploadErrorCode::InvalidFile,
            Self::InvalidRegion(_) => UploadErrorCode::InvalidRegion,
            Self::AlreadyInProgress(_) => UploadErrorCode::UploadInProgress,
            Self::InitFailed(_) => UploadErrorCode::UploadInitFailed,
            Self::Transfer(_) => UploadErrorCode::UploadFailed,
            Self::Cancelled => UploadErrorCode::UploadCancelled,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgs(_) | Self::InvalidFile(_) | Self::InvalidRegion(_) | Self::AlreadyInProgress(_) => {
                ErrorKind::Input
            }
            Self::InitFailed(_) => ErrorKind::Initialization,
            Self::Transfer(_) => ErrorKind::Transfer,
            Self::Cancelled => ErrorKind::Cancellation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_names() {
        assert_eq!(UploadError::InvalidArgs("token").code().as_str(), "INVALID_ARGS");
        assert_eq!(UploadError::InvalidFile("/nope".into()).code().as_str(), "INVALID_FILE");
        assert_eq!(
            UploadError::from(RegionError::Invalid("mars-1".into())).code().as_str(),
            "INVALID_REGION"
        );
        assert_eq!(UploadError::InitFailed("boom".into()).code().as_str(), "UPLOAD_INIT_FAILED");
        assert_eq!(UploadError::Transfer("boom".into()).code().as_str(), "UPLOAD_FAILED");
        assert_eq!(UploadError::Cancelled.code().as_str(), "UPLOAD_CANCELLED");
    }

    #[test]
    fn kinds() {
        assert_eq!(UploadError::InvalidArgs("bucket").kind(), ErrorKind::Input);
        assert_eq!(UploadError::AlreadyInProgress("a".into()).kind(), ErrorKind::Input);
        assert_eq!(UploadError::InitFailed(String::new()).kind(), ErrorKind::Initialization);
        assert_eq!(UploadError::Transfer(String::new()).kind(), ErrorKind::Transfer);
        assert_eq!(UploadError::Cancelled.kind(), ErrorKind::Cancellation);
    }

    #[test]
    fn messages() {
        let err = UploadError::InvalidFile("/tmp/missing.jpg".into());
        assert_eq!(err.to_string(), "File does not exist at path: /tmp/missing.jpg");
        let err = UploadError::from(RegionError::Invalid("mars-1".into()));
        assert_eq!(err.to_string(), "Region is null or invalid: \"mars-1\"");
    }
}
