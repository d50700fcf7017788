//! Object Storage
//!
//! Thin wrapper around an object store. Every backend answers the same four
//! calls, each a single request with no retry and no pagination loop:
//! - `put` - upload bytes with a canned ACL
//! - `list_by_prefix` - one page of objects under a prefix
//! - `public_url` - string formatting only, no network call
//! - `signed_url` - time-limited GET link
//!
//! Backends:
//! - `s3_client` - S3-compatible services via rust-s3
//! - `memory` - in-process bucket with HMAC-signed links served by this app

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub mod links;
pub mod memory;
pub mod s3_client;

pub use links::{resolve_links, LinkKind, ObjectLink};
pub use memory::{MemoryStorage, ResolvedObject, SignatureParams};
pub use s3_client::S3Client;

/// Maximum signed URL lifetime (7 days, the SigV4 presign limit).
pub const MAX_SIGNED_URL_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Objects returned by a single list call.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Provider(#[from] s3::error::S3Error),

    #[error("Credentials error: {0}")]
    Credentials(#[from] s3::creds::error::CredentialsError),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Invalid expiry: {0}")]
    InvalidExpiry(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Signed URL expired at {0}")]
    Expired(i64),
}

impl From<url::ParseError> for StorageError {
    fn from(e: url::ParseError) -> Self {
        StorageError::InvalidUrl(e.to_string())
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Visibility of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Public,
    Private,
}

impl AccessMode {
    pub fn from_private_flag(private: bool) -> Self {
        if private {
            AccessMode::Private
        } else {
            AccessMode::Public
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Public => "public",
            AccessMode::Private => "private",
        }
    }

    /// S3 canned ACL sent as `x-amz-acl`.
    pub fn canned_acl(&self) -> &'static str {
        match self {
            AccessMode::Public => "public-read",
            AccessMode::Private => "private",
        }
    }

    /// Recover the access mode from a key written by [`upload_key`].
    ///
    /// List responses carry no ACLs, so uploads record the mode as the key
    /// segment right after `upload_prefix`. Keys outside the prefix, or
    /// with any other segment there, are private.
    pub fn from_key(upload_prefix: &str, key: &str) -> Self {
        let rest = match key.strip_prefix(key_prefix(upload_prefix).as_str()) {
            Some(rest) => rest,
            None => return AccessMode::Private,
        };

        match rest.split_once('/') {
            Some(("public", _)) => AccessMode::Public,
            _ => AccessMode::Private,
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: String,
    pub access: AccessMode,
    pub e_tag: Option<String>,
}

impl ObjectDescriptor {
    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Short provider name for logs and health output.
    fn provider(&self) -> &'static str;

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        access: AccessMode,
    ) -> StorageResult<()>;

    /// At most one provider page; truncation is logged, not followed.
    async fn list_by_prefix(&self, bucket: &str, prefix: &str)
        -> StorageResult<Vec<ObjectDescriptor>>;

    /// Never checks that the object exists or is public.
    fn public_url(&self, bucket: &str, key: &str) -> StorageResult<String>;

    async fn signed_url(&self, bucket: &str, key: &str, ttl: Duration) -> StorageResult<String>;
}

/// Content type inferred from the key's extension.
pub fn infer_content_type(key: &str) -> String {
    mime_guess::from_path(key)
        .first()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM)
        .essence_str()
        .to_string()
}

/// Validate a signed URL lifetime.
pub fn validate_expiry(ttl: Duration) -> StorageResult<()> {
    if ttl.is_zero() {
        Err(StorageError::InvalidExpiry(
            "expiry must be greater than zero".to_string(),
        ))
    } else if ttl > MAX_SIGNED_URL_TTL {
        Err(StorageError::InvalidExpiry(format!(
            "expiry of {}s exceeds maximum of {}s",
            ttl.as_secs(),
            MAX_SIGNED_URL_TTL.as_secs()
        )))
    } else {
        Ok(())
    }
}

/// Build the key for an uploaded file: `{prefix}{access}/{file name}`.
///
/// Browsers may send client-side paths (`C:\fakepath\report.pdf`), so only
/// the last path component of `file_name` is kept.
pub fn upload_key(prefix: &str, access: AccessMode, file_name: &str) -> StorageResult<String> {
    let base_name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if base_name.is_empty() || base_name == "." || base_name == ".." {
        return Err(StorageError::InvalidKey(format!(
            "'{}' has no usable file name",
            file_name
        )));
    }

    Ok(format!("{}{}/{}", key_prefix(prefix), access, base_name))
}

/// Upload prefix as it appears at the start of keys: no leading `/`,
/// trailing `/` unless empty.
fn key_prefix(prefix: &str) -> String {
    let prefix = prefix.trim_start_matches('/');
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    }
}

/// Append `leading` segments and the key's segments to `base`, percent-encoding each.
pub(crate) fn join_key(base: &Url, leading: &[&str], key: &str) -> StorageResult<Url> {
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| StorageError::InvalidUrl(format!("{} cannot be a base URL", base)))?;
        segments.pop_if_empty();
        segments.extend(leading.iter().copied());
        segments.extend(key.split('/'));
    }
    Ok(url)
}
