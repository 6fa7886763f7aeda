use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::{
    CleanupConfig, DatabaseConfig, JobRetentionConfig, MotionConfig, MqAppConfig, MqBackend,
    StorageConfig,
};
pub use worker::config::WorkerConfig;
use worker::config::WorkerAppConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default)]
    pub allow_origins: Vec<String>,
    /// Default: 3600.
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
}

fn default_cors_max_age() -> u64 {
    3600
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: Vec::new(),
            max_age: default_cors_max_age(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Default: "127.0.0.1".
    #[serde(default = "default_host")]
    pub host: String,
    /// Default: 3000.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest single uploaded file in bytes. Default: 512 MiB.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default)]
    pub cors: CorsConfig,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    3000
}
fn default_max_upload_bytes() -> u64 {
    512 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub jobs: JobRetentionConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    /// Used by the embedded worker when the memory queue is selected.
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("MOTION_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("mq.queue_name", "motion_jobs")?
            .set_default("storage.mode", "local")?
            .set_default("cleanup.enabled", true)?
            .add_source(File::with_name(&config_path).required(false))
            // e.g. MOTION__CLEANUP__ENABLED=false
            .add_source(Environment::with_prefix("MOTION").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// The subset the worker pipeline needs.
    pub fn worker_app_config(&self) -> WorkerAppConfig {
        WorkerAppConfig {
            worker: self.worker.clone(),
            database: self.database.clone(),
            mq: self.mq.clone(),
            storage: self.storage.clone(),
            motion: self.motion.clone(),
        }
    }
}
