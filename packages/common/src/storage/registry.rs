use std::sync::Arc;

use tokio::sync::OnceCell;
#[cfg(feature = "object-storage")]
use tracing::{info, warn};

use super::error::StorageError;
use super::filesystem::LocalObjectStore;
use super::keys::ObjectKeys;
use super::kind::StorageKind;
use super::traits::ObjectStore;
use crate::config::{OssConfig, StorageConfig};

/// Resolves the backend a record was created with.
///
/// The local store is opened eagerly. The object store client is built on
/// first use and cached for the life of the process; a failed construction
/// leaves the cache empty so the next caller retries from scratch.
pub struct StorageRegistry {
    default_kind: StorageKind,
    keys: ObjectKeys,
    local: Arc<dyn ObjectStore>,
    oss_config: Option<OssConfig>,
    oss: OnceCell<Arc<dyn ObjectStore>>,
}

impl StorageRegistry {
    pub async fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let local = LocalObjectStore::new(&config.local_root).await?;
        Ok(Self {
            default_kind: config.mode,
            keys: ObjectKeys::new(&config.prefix),
            local: Arc::new(local),
            oss_config: config.oss.clone(),
            oss: OnceCell::new(),
        })
    }

    /// Registry over explicit backends, mainly for tests and embedding.
    pub fn with_stores(
        default_kind: StorageKind,
        keys: ObjectKeys,
        local: Arc<dyn ObjectStore>,
        oss: Option<Arc<dyn ObjectStore>>,
    ) -> Self {
        Self {
            default_kind,
            keys,
            local,
            oss_config: None,
            oss: OnceCell::new_with(oss),
        }
    }

    /// Backend assigned to records created from now on.
    pub fn default_kind(&self) -> StorageKind {
        self.default_kind
    }

    pub fn keys(&self) -> &ObjectKeys {
        &self.keys
    }

    pub async fn resolve(&self, kind: StorageKind) -> Result<Arc<dyn ObjectStore>, StorageError> {
        match kind {
            StorageKind::Local => Ok(Arc::clone(&self.local)),
            StorageKind::Oss => self
                .oss
                .get_or_try_init(|| self.connect_oss())
                .await
                .map(Arc::clone),
        }
    }

    #[cfg(feature = "object-storage")]
    async fn connect_oss(&self) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let Some(config) = &self.oss_config else {
            return Err(StorageError::Unavailable(
                "object storage is not configured".into(),
            ));
        };
        match super::s3::S3ObjectStore::connect(config).await {
            Ok(store) => {
                info!(bucket = %config.bucket, endpoint = %config.endpoint, "Object storage client ready");
                Ok(Arc::new(store))
            }
            Err(e) => {
                warn!(error = %e, "Object storage client construction failed");
                Err(e)
            }
        }
    }

    #[cfg(not(feature = "object-storage"))]
    async fn connect_oss(&self) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let _ = &self.oss_config;
        Err(StorageError::Unavailable(
            "object storage support is not compiled in".into(),
        ))
    }
}
