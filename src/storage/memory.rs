//! In-process object store
//!
//! Keeps objects in memory and hands out links to this application's own
//! `/local` route. Private objects are only served through signed links:
//!
//! `{base}/local/{bucket}/{key}?expires={unix secs}&signature={hex}`
//!
//! where the signature is HMAC-SHA256 over `"{bucket}/{key}:{expires}"`.
//! A link stops working once the current time reaches `expires`.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use super::{
    join_key, validate_expiry, AccessMode, ObjectDescriptor, ObjectStorage, StorageError,
    StorageResult, DEFAULT_PAGE_SIZE,
};

type HmacSha256 = Hmac<Sha256>;

/// Path segment the local object route is mounted under.
pub const LOCAL_ROUTE_SEGMENT: &str = "local";

#[derive(Debug, Clone)]
struct MemoryObject {
    body: Bytes,
    content_type: String,
    access: AccessMode,
    last_modified: DateTime<Utc>,
    e_tag: String,
}

/// Query parameters carried by a signed link.
///
/// Kept as raw strings so a malformed value is an access failure rather
/// than a query-parsing one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignatureParams {
    pub expires: Option<String>,
    pub signature: Option<String>,
}

/// Bytes handed back to a caller holding a valid link.
#[derive(Debug, Clone)]
pub struct ResolvedObject {
    pub body: Bytes,
    pub content_type: String,
    pub access: AccessMode,
}

pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, BTreeMap<String, MemoryObject>>>,
    base_url: Url,
    signing_key: Vec<u8>,
    page_size: usize,
}

impl MemoryStorage {
    /// Create a store whose links point at `base_url`.
    ///
    /// Without a `signing_secret` a random key is generated, so signed links
    /// do not survive a restart.
    pub fn new(base_url: &str, signing_secret: Option<&str>) -> StorageResult<Self> {
        let signing_key = match signing_secret {
            Some(secret) => secret.as_bytes().to_vec(),
            None => rand::random::<[u8; 32]>().to_vec(),
        };

        Ok(Self {
            buckets: RwLock::new(HashMap::new()),
            base_url: Url::parse(base_url)?,
            signing_key,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Override the list page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn mac(&self, bucket: &str, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .expect("HMAC can take key of any size");
        mac.update(format!("{}/{}:{}", bucket, key, expires).as_bytes());
        mac
    }

    fn sign(&self, bucket: &str, key: &str, expires: i64) -> String {
        hex::encode(self.mac(bucket, key, expires).finalize().into_bytes())
    }

    /// Constant-time check of a hex signature.
    fn verify(&self, bucket: &str, key: &str, expires: i64, signature: &str) -> bool {
        match hex::decode(signature) {
            Ok(bytes) => self.mac(bucket, key, expires).verify_slice(&bytes).is_ok(),
            Err(_) => false,
        }
    }

    /// Serve an object the way the public internet would see it right now.
    pub async fn resolve(
        &self,
        bucket: &str,
        key: &str,
        params: &SignatureParams,
    ) -> StorageResult<ResolvedObject> {
        self.resolve_at(bucket, key, params, Utc::now().timestamp())
            .await
    }

    /// Same as [`MemoryStorage::resolve`] with an explicit clock reading.
    pub async fn resolve_at(
        &self,
        bucket: &str,
        key: &str,
        params: &SignatureParams,
        now: i64,
    ) -> StorageResult<ResolvedObject> {
        let object = {
            let guard = self.buckets.read().await;
            guard
                .get(bucket)
                .and_then(|objects| objects.get(key))
                .cloned()
                .ok_or_else(|| StorageError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })?
        };

        if object.access == AccessMode::Private {
            let (expires, signature) =
                match (params.expires.as_deref(), params.signature.as_deref()) {
                    (Some(expires), Some(signature)) => (expires, signature),
                    _ => {
                        return Err(StorageError::AccessDenied(
                            "private object requires a signed link".to_string(),
                        ))
                    }
                };
            let expires: i64 = expires.trim().parse().map_err(|_| {
                StorageError::AccessDenied(format!("malformed expiry '{}'", expires))
            })?;

            if !self.verify(bucket, key, expires, signature) {
                warn!(bucket = %bucket, key = %key, "Rejected link with invalid signature");
                return Err(StorageError::AccessDenied("signature mismatch".to_string()));
            }

            if now >= expires {
                return Err(StorageError::Expired(expires));
            }
        }

        Ok(ResolvedObject {
            body: object.body,
            content_type: object.content_type,
            access: object.access,
        })
    }

    /// Resolve a full link previously produced by this store.
    pub async fn resolve_url_at(&self, link: &str, now: i64) -> StorageResult<ResolvedObject> {
        let url = Url::parse(link)?;
        let base_path = self.base_url.path().trim_end_matches('/');
        let route_prefix = format!("{}/{}/", base_path, LOCAL_ROUTE_SEGMENT);

        let rest = url
            .path()
            .strip_prefix(route_prefix.as_str())
            .ok_or_else(|| StorageError::InvalidUrl(format!("{} is not a local link", link)))?;
        let (bucket, encoded_key) = rest
            .split_once('/')
            .ok_or_else(|| StorageError::InvalidUrl(format!("{} has no object key", link)))?;

        let bucket = decode_segment(bucket)?;
        let key = encoded_key
            .split('/')
            .map(decode_segment)
            .collect::<StorageResult<Vec<_>>>()?
            .join("/");

        let mut params = SignatureParams::default();
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "expires" => params.expires = Some(value.into_owned()),
                "signature" => params.signature = Some(value.into_owned()),
                _ => {}
            }
        }

        self.resolve_at(&bucket, &key, &params, now).await
    }
}

fn decode_segment(segment: &str) -> StorageResult<String> {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .map_err(|e| StorageError::InvalidUrl(e.to_string()))
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    fn provider(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        access: AccessMode,
    ) -> StorageResult<()> {
        let e_tag = hex::encode(Sha256::digest(&body));
        let size = body.len();

        let object = MemoryObject {
            body,
            content_type: content_type.to_string(),
            access,
            last_modified: Utc::now(),
            e_tag,
        };

        let mut guard = self.buckets.write().await;
        guard
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);

        debug!(bucket = %bucket, key = %key, size, access = %access, "Stored object in memory");
        Ok(())
    }

    async fn list_by_prefix(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> StorageResult<Vec<ObjectDescriptor>> {
        let guard = self.buckets.read().await;
        let Some(objects) = guard.get(bucket) else {
            return Ok(Vec::new());
        };

        let mut matching = objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix));

        let page: Vec<ObjectDescriptor> = matching
            .by_ref()
            .take(self.page_size)
            .map(|(key, object)| ObjectDescriptor {
                key: key.clone(),
                size: object.body.len() as u64,
                last_modified: Some(object.last_modified),
                content_type: object.content_type.clone(),
                access: object.access,
                e_tag: Some(object.e_tag.clone()),
            })
            .collect();

        if matching.next().is_some() {
            warn!(
                bucket = %bucket,
                prefix = %prefix,
                page_size = self.page_size,
                "Listing truncated to one page"
            );
        }

        Ok(page)
    }

    fn public_url(&self, bucket: &str, key: &str) -> StorageResult<String> {
        Ok(join_key(&self.base_url, &[LOCAL_ROUTE_SEGMENT, bucket], key)?.into())
    }

    async fn signed_url(&self, bucket: &str, key: &str, ttl: Duration) -> StorageResult<String> {
        validate_expiry(ttl)?;

        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = self.sign(bucket, key, expires);

        let mut url = join_key(&self.base_url, &[LOCAL_ROUTE_SEGMENT, bucket], key)?;
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &signature);

        Ok(url.into())
    }
}
