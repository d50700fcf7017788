use std::sync::Arc;

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::config::{Config, StorageProvider};
use crate::routes::page;
use crate::storage::{AccessMode, MemoryStorage, ObjectLink, ObjectStorage, S3Client};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub storage: Arc<dyn ObjectStorage>,
    /// Set when objects live in this process and are served under `/local`.
    pub local_store: Option<Arc<MemoryStorage>>,
    pub templates: Arc<Handlebars<'static>>,
}

impl AppState {
    /// Build the storage backend selected by `config.storage.provider`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        match config.storage.provider {
            StorageProvider::S3 => {
                let client = S3Client::new(&config.storage)?;
                Self::with_storage(config, Arc::new(client), None)
            }
            StorageProvider::Memory => {
                let store = Arc::new(MemoryStorage::new(
                    &config.local_base_url(),
                    config.storage.local_signing_secret.as_deref(),
                )?);
                info!(base_url = %config.local_base_url(), "Using in-memory object storage");
                Self::with_storage(config, store.clone(), Some(store))
            }
        }
    }

    pub fn with_storage(
        config: Config,
        storage: Arc<dyn ObjectStorage>,
        local_store: Option<Arc<MemoryStorage>>,
    ) -> anyhow::Result<Self> {
        let templates = page::templates()
            .map_err(|e| anyhow::anyhow!("Failed to register page templates: {}", e))?;

        Ok(Self {
            config,
            storage,
            local_store,
            templates: Arc::new(templates),
        })
    }

    pub fn bucket(&self) -> &str {
        self.config.storage.bucket()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub upload_id: Uuid,
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub access: AccessMode,
    /// Public URL, or a signed URL with the default lifetime for private uploads.
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ListQuery {
    #[validate(length(max = 1024))]
    pub prefix: Option<String>,
    pub reveal_private: Option<bool>,
    #[validate(range(min = 1, max = 604800))]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingResponse {
    pub bucket: String,
    pub prefix: String,
    pub objects: Vec<ObjectLink>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PublicUrlQuery {
    #[validate(length(min = 1, max = 1024))]
    pub key: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignedUrlQuery {
    #[validate(length(min = 1, max = 1024))]
    pub key: String,
    #[validate(range(min = 1, max = 604800))]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlResponse {
    pub key: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub storage_provider: String,
    pub bucket: String,
}
