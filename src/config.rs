use serde::Deserialize;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::storage::MAX_SIGNED_URL_TTL;

pub const DEFAULT_MEMORY_BUCKET: &str = "demo";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    S3,
    Memory,
}

impl StorageProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageProvider::S3 => "s3",
            StorageProvider::Memory => "memory",
        }
    }
}

impl fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "s3" => Ok(StorageProvider::S3),
            "memory" | "local" => Ok(StorageProvider::Memory),
            other => Err(ConfigError::Invalid {
                var: "STORAGE_PROVIDER",
                reason: format!("unknown provider '{}', expected 's3' or 'memory'", other),
            }),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_access_key_id: String,
    pub s3_secret_access_key: String,
    pub s3_endpoint: Option<String>,
    pub s3_request_timeout_secs: Option<u64>,
    pub public_base_url: Option<String>,
    pub upload_prefix: String,
    pub signed_url_ttl_secs: u64,
    pub local_signing_secret: Option<String>,
}

// Hand-written so credentials never reach the logs.
impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("provider", &self.provider)
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_region", &self.s3_region)
            .field("s3_access_key_id", &mask(&self.s3_access_key_id))
            .field("s3_secret_access_key", &mask(&self.s3_secret_access_key))
            .field("s3_endpoint", &self.s3_endpoint)
            .field("s3_request_timeout_secs", &self.s3_request_timeout_secs)
            .field("public_base_url", &self.public_base_url)
            .field("upload_prefix", &self.upload_prefix)
            .field("signed_url_ttl_secs", &self.signed_url_ttl_secs)
            .field(
                "local_signing_secret",
                &self.local_signing_secret.as_deref().map(mask),
            )
            .finish()
    }
}

fn mask(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl StorageConfig {
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.s3_request_timeout_secs.map(Duration::from_secs)
    }

    /// Bucket the service works against. Only the memory provider falls
    /// back to a default name; an S3 bucket must be configured.
    pub fn bucket(&self) -> &str {
        if self.s3_bucket.is_empty() && self.provider == StorageProvider::Memory {
            DEFAULT_MEMORY_BUCKET
        } else {
            &self.s3_bucket
        }
    }
}

impl Config {
    /// Load configuration from the process environment (and `.env` if present).
    ///
    /// Reading never fails on missing storage values; call [`Config::validate`]
    /// before building any storage client.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let provider: StorageProvider = match var("STORAGE_PROVIDER") {
            Some(value) => value.parse()?,
            None => StorageProvider::S3,
        };

        Ok(Self {
            server: ServerConfig {
                port: parse_var(&var, "PORT", 3000)?,
                host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                cors_allowed_origins: var("ALLOWED_ORIGINS")
                    .unwrap_or_else(|| "*".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                max_upload_bytes: parse_var(&var, "MAX_UPLOAD_BYTES", 25 * 1024 * 1024)?,
            },
            storage: StorageConfig {
                provider,
                s3_bucket: var("S3_BUCKET").unwrap_or_default(),
                s3_region: var("S3_REGION").unwrap_or_default(),
                s3_access_key_id: var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
                s3_secret_access_key: var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
                s3_endpoint: var("S3_ENDPOINT"),
                s3_request_timeout_secs: var("S3_REQUEST_TIMEOUT_SECS")
                    .map(|v| parse_value("S3_REQUEST_TIMEOUT_SECS", &v))
                    .transpose()?,
                public_base_url: var("PUBLIC_BASE_URL"),
                upload_prefix: var("UPLOAD_PREFIX").unwrap_or_else(|| "uploads/".to_string()),
                signed_url_ttl_secs: parse_var(&var, "SIGNED_URL_TTL_SECS", 3600)?,
                local_signing_secret: var("LOCAL_SIGNING_SECRET"),
            },
        })
    }

    /// Fail fast on anything the selected provider cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let storage = &self.storage;

        if storage.provider == StorageProvider::S3 {
            require("S3_BUCKET", &storage.s3_bucket)?;
            require("S3_REGION", &storage.s3_region)?;
            require("AWS_ACCESS_KEY_ID", &storage.s3_access_key_id)?;
            require("AWS_SECRET_ACCESS_KEY", &storage.s3_secret_access_key)?;
        }

        if let Some(endpoint) = &storage.s3_endpoint {
            check_url("S3_ENDPOINT", endpoint)?;
        }
        if let Some(base) = &storage.public_base_url {
            check_url("PUBLIC_BASE_URL", base)?;
        }

        let ttl = storage.signed_url_ttl();
        if ttl.is_zero() || ttl > MAX_SIGNED_URL_TTL {
            return Err(ConfigError::Invalid {
                var: "SIGNED_URL_TTL_SECS",
                reason: format!(
                    "must be between 1 and {} seconds",
                    MAX_SIGNED_URL_TTL.as_secs()
                ),
            });
        }

        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid {
                var: "MAX_UPLOAD_BYTES",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Base URL for links served by this process (memory provider).
    pub fn local_base_url(&self) -> String {
        self.storage
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.server.port))
    }
}

fn require(var: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing(var))
    } else {
        Ok(())
    }
}

fn check_url(var: &'static str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value).map(|_| ()).map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

fn parse_var<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => parse_value(name, &value),
        None => Ok(default),
    }
}

fn parse_value<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var: name,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    fn s3_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("S3_BUCKET", "uploads-demo"),
            ("S3_REGION", "eu-west-1"),
            ("AWS_ACCESS_KEY_ID", "AKIAFAKE"),
            ("AWS_SECRET_ACCESS_KEY", "fake-secret"),
        ]
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&s3_vars()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.cors_allowed_origins, vec!["*".to_string()]);
        assert_eq!(config.storage.provider, StorageProvider::S3);
        assert_eq!(config.storage.upload_prefix, "uploads/");
        assert_eq!(config.storage.signed_url_ttl(), Duration::from_secs(3600));
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_missing_s3_values_fail_fast() {
        let config = config_from(&[("S3_REGION", "eu-west-1")]).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("S3_BUCKET"))
        ));

        let mut vars = s3_vars();
        vars.retain(|(k, _)| *k != "AWS_SECRET_ACCESS_KEY");
        let config = config_from(&vars).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("AWS_SECRET_ACCESS_KEY"))
        ));
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let mut vars = s3_vars();
        vars.push(("S3_BUCKET", "   "));
        vars.remove(0);
        let config = config_from(&vars).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("S3_BUCKET"))
        ));
    }

    #[test]
    fn test_memory_provider_needs_no_credentials() {
        let config = config_from(&[("STORAGE_PROVIDER", "memory"), ("PORT", "8080")]).unwrap();
        assert_eq!(config.storage.provider, StorageProvider::Memory);
        assert!(config.storage.s3_bucket.is_empty());
        assert_eq!(config.storage.bucket(), DEFAULT_MEMORY_BUCKET);
        assert_eq!(config.local_base_url(), "http://localhost:8080");
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_switching_to_s3_still_requires_bucket() {
        let mut vars = s3_vars();
        vars.retain(|(k, _)| *k != "S3_BUCKET");
        vars.push(("STORAGE_PROVIDER", "memory"));
        let mut config = config_from(&vars).unwrap();
        tokio_test::assert_ok!(config.validate());

        config.storage.provider = StorageProvider::S3;
        assert_eq!(config.storage.bucket(), "");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("S3_BUCKET"))
        ));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config_from(&[("PORT", "not-a-port")]),
            Err(ConfigError::Invalid { var: "PORT", .. })
        ));
        assert!(matches!(
            config_from(&[("STORAGE_PROVIDER", "ftp")]),
            Err(ConfigError::Invalid { var: "STORAGE_PROVIDER", .. })
        ));

        let mut vars = s3_vars();
        vars.push(("SIGNED_URL_TTL_SECS", "604801"));
        let config = config_from(&vars).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { var: "SIGNED_URL_TTL_SECS", .. })
        ));

        let mut vars = s3_vars();
        vars.push(("S3_ENDPOINT", "not a url"));
        let config = config_from(&vars).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { var: "S3_ENDPOINT", .. })
        ));
    }

    #[test]
    fn test_allowed_origins_split() {
        let mut vars = s3_vars();
        vars.push(("ALLOWED_ORIGINS", "http://a.test, http://b.test,"));
        let config = config_from(&vars).unwrap();
        assert_eq!(
            config.server.cors_allowed_origins,
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = config_from(&s3_vars()).unwrap();
        let rendered = format!("{:?}", config.storage);
        assert!(!rendered.contains("fake-secret"));
        assert!(!rendered.contains("AKIAFAKE"));
        assert!(rendered.contains("<redacted>"));
    }
}
