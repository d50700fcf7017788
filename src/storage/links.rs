//! Link resolution for listings
//!
//! Each listed object gets its link from an independent storage call. The
//! calls run concurrently and are joined before the caller renders; the
//! first failure aborts the whole resolution.

use std::time::Duration;

use futures::future::try_join_all;
use serde::Serialize;
use tracing::debug;

use super::{AccessMode, ObjectDescriptor, ObjectStorage, StorageError, StorageResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkKind {
    Public,
    Signed { expires_in_secs: u64 },
    Hidden,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectLink {
    #[serde(flatten)]
    pub object: ObjectDescriptor,
    pub url: Option<String>,
    pub link: LinkKind,
}

/// Attach a link to every object, in listing order.
///
/// Public objects get their public URL. Private objects get a signed URL
/// valid for `ttl` when `reveal_private` is set and no link otherwise.
pub async fn resolve_links(
    storage: &dyn ObjectStorage,
    bucket: &str,
    objects: Vec<ObjectDescriptor>,
    reveal_private: bool,
    ttl: Duration,
) -> StorageResult<Vec<ObjectLink>> {
    let count = objects.len();

    let lookups = objects.into_iter().map(|object| async move {
        let (url, link) = match object.access {
            AccessMode::Public => (
                Some(storage.public_url(bucket, &object.key)?),
                LinkKind::Public,
            ),
            AccessMode::Private if reveal_private => (
                Some(storage.signed_url(bucket, &object.key, ttl).await?),
                LinkKind::Signed {
                    expires_in_secs: ttl.as_secs(),
                },
            ),
            AccessMode::Private => (None, LinkKind::Hidden),
        };

        Ok::<_, StorageError>(ObjectLink { object, url, link })
    });

    let links = try_join_all(lookups).await?;
    debug!(bucket = %bucket, count, reveal_private, "Resolved object links");
    Ok(links)
}
