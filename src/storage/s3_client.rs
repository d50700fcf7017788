//! S3-compatible storage backend
//!
//! Talks to AWS S3 or any S3-compatible service (MinIO, R2, Spaces, ...)
//! through rust-s3. Setting an endpoint switches to path-style addressing.
//! Provider errors are returned as-is; nothing here retries.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::serde_types::Object;
use s3::{Bucket, Region};
use tracing::{debug, info, warn};
use url::Url;

use super::{
    infer_content_type, join_key, validate_expiry, AccessMode, ObjectDescriptor, ObjectStorage,
    StorageError, StorageResult,
};
use crate::config::StorageConfig;

const ACL_HEADER: &str = "x-amz-acl";

pub struct S3Client {
    region: Region,
    region_name: String,
    credentials: Credentials,
    endpoint: Option<Url>,
    public_base: Option<Url>,
    upload_prefix: String,
    request_timeout: Option<Duration>,
}

impl S3Client {
    pub fn new(config: &StorageConfig) -> StorageResult<Self> {
        let endpoint = config
            .s3_endpoint
            .as_deref()
            .map(Url::parse)
            .transpose()?;

        let region = match &endpoint {
            Some(endpoint) => Region::Custom {
                region: config.s3_region.clone(),
                endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
            },
            None => config.s3_region.parse::<Region>().map_err(|e| {
                StorageError::Config(format!("invalid region '{}': {}", config.s3_region, e))
            })?,
        };

        let credentials = Credentials::new(
            Some(config.s3_access_key_id.as_str()),
            Some(config.s3_secret_access_key.as_str()),
            None,
            None,
            None,
        )?;

        let public_base = config
            .public_base_url
            .as_deref()
            .map(Url::parse)
            .transpose()?;

        info!(
            region = %config.s3_region,
            endpoint = ?config.s3_endpoint,
            "Initialized S3 client"
        );

        Ok(Self {
            region,
            region_name: config.s3_region.clone(),
            credentials,
            endpoint,
            public_base,
            upload_prefix: config.upload_prefix.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    fn open_bucket(&self, name: &str) -> StorageResult<Box<Bucket>> {
        let mut bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())?;
        if self.endpoint.is_some() {
            bucket = bucket.with_path_style();
        }
        if self.request_timeout.is_some() {
            bucket.set_request_timeout(self.request_timeout);
        }
        Ok(Box::new(bucket))
    }

    fn descriptor(&self, object: Object) -> ObjectDescriptor {
        let last_modified = DateTime::parse_from_rfc3339(&object.last_modified)
            .map(|t| t.with_timezone(&Utc))
            .ok();

        ObjectDescriptor {
            content_type: infer_content_type(&object.key),
            access: AccessMode::from_key(&self.upload_prefix, &object.key),
            e_tag: object.e_tag.map(|tag| tag.trim_matches('"').to_string()),
            size: object.size,
            last_modified,
            key: object.key,
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Client {
    fn provider(&self) -> &'static str {
        "s3"
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        access: AccessMode,
    ) -> StorageResult<()> {
        let mut handle = self.open_bucket(bucket)?;
        handle.add_header(ACL_HEADER, access.canned_acl());

        debug!(bucket = %bucket, key = %key, size = body.len(), acl = access.canned_acl(), "PUT object");
        let response = handle
            .put_object_with_content_type(key, &body, content_type)
            .await?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            let body = String::from_utf8_lossy(response.as_slice()).into_owned();
            return Err(S3Error::HttpFailWithBody(status, body).into());
        }

        Ok(())
    }

    async fn list_by_prefix(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> StorageResult<Vec<ObjectDescriptor>> {
        let handle = self.open_bucket(bucket)?;

        let (page, _status) = handle
            .list_page(prefix.to_string(), None, None, None, None)
            .await?;

        if page.is_truncated {
            warn!(
                bucket = %bucket,
                prefix = %prefix,
                returned = page.contents.len(),
                "Listing truncated to one page"
            );
        }

        Ok(page
            .contents
            .into_iter()
            .map(|object| self.descriptor(object))
            .collect())
    }

    fn public_url(&self, bucket: &str, key: &str) -> StorageResult<String> {
        let url = match (&self.public_base, &self.endpoint) {
            (Some(base), _) => join_key(base, &[], key)?,
            (None, Some(endpoint)) => join_key(endpoint, &[bucket], key)?,
            (None, None) => {
                let base = Url::parse(&format!(
                    "https://{}.s3.{}.amazonaws.com/",
                    bucket, self.region_name
                ))?;
                join_key(&base, &[], key)?
            }
        };
        Ok(url.into())
    }

    async fn signed_url(&self, bucket: &str, key: &str, ttl: Duration) -> StorageResult<String> {
        validate_expiry(ttl)?;

        let handle = self.open_bucket(bucket)?;
        let url = handle.presign_get(key, ttl.as_secs() as u32, None).await?;
        Ok(url)
    }
}
