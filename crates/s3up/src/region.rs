//! Region resolution
//!
//! Maps a caller-supplied region name onto one of the regions this crate
//! knows how to upload to.
//!
//! # Example
//! ```
//! use s3up::region::Region;
//!
//! let region = Region::resolve("US-EAST-1").unwrap();
//! assert_eq!(region.as_str(), "us-east-1");
//!
//! assert!(Region::resolve("mars-1").is_err());
//! assert!(Region::resolve("").is_err());
//! ```

use std::fmt;

/// Every region identifier accepted by [`Region::resolve`].
pub const SUPPORTED_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "af-south-1",
    "ap-east-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ca-central-1",
    "ca-west-1",
    "eu-central-1",
    "eu-central-2",
    "eu-north-1",
    "eu-south-1",
    "eu-south-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "il-central-1",
    "me-central-1",
    "me-south-1",
    "sa-east-1",
    "us-gov-east-1",
    "us-gov-west-1",
    "cn-north-1",
    "cn-northwest-1",
];

/// A resolved region handle.
///
/// Only values from [`SUPPORTED_REGIONS`] can be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region(&'static str);

/// Error type for unresolvable region names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    /// The name is empty, malformed, or not a supported region.
    #[error("Region is null or invalid: {0:?}")]
    Invalid(String),
}

impl Region {
    /// Resolves a region name, ignoring ASCII case.
    ///
    /// # Errors
    /// Returns [`RegionError::Invalid`] if the name is empty, malformed or unknown.
    pub fn resolve(name: &str) -> Result<Self, RegionError> {
        let name = name.trim();
        if !is_well_formed(name) {
            return Err(RegionError::Invalid(name.to_owned()));
        }
        SUPPORTED_REGIONS
            .iter()
            .copied()
            .find(|r| r.eq_ignore_ascii_case(name))
            .map(Self)
            .ok_or_else(|| RegionError::Invalid(name.to_owned()))
    }

    /// Returns the canonical (lowercase) region identifier.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        self.0
    }

    /// Converts into the region type understood by the AWS SDK clients.
    #[must_use]
    pub fn to_sdk(&self) -> aws_sdk_s3::config::Region {
        aws_sdk_s3::config::Region::from_static(self.0)
    }
}

impl AsRef<str> for Region {
    fn as_ref(&self) -> &str {
        self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Cheap syntactic check performed before the table lookup.
///
/// Accepts ASCII letters, digits and single hyphens; must start with a letter
/// and must not end with a hyphen.
fn is_well_formed(s: &str) -> bool {
    let bytes = s.as_bytes();

    let Some(first) = bytes.first() else {
        return false;
    };
    if !first.is_ascii_alphabetic() {
        return false;
    }

    if !bytes.iter().all(|&b| b.is_ascii_alphanumeric() || b == b'-') {
        return false;
    }

    !s.ends_with('-') && !s.contains("--")
}
